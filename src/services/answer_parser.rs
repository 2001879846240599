use crate::models::answer_key::AnswerOption;
use crate::models::exam::SubjectRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedResponse {
    pub question_number: u32,
    pub answer: Option<AnswerOption>,
}

pub struct AnswerParser;

impl AnswerParser {
    /// Splits a raw subject chunk into one response per question of `range`.
    /// Position `i` of the chunk answers question `range.start + i`; missing
    /// tail positions and characters outside A-E are blank.
    pub fn parse(raw: &str, range: &SubjectRange) -> Vec<ParsedResponse> {
        let mut chars = raw.chars();
        (range.start..=range.end)
            .map(|question_number| ParsedResponse {
                question_number,
                answer: chars.next().and_then(AnswerOption::from_char),
            })
            .collect()
    }

    /// Characters beyond the range length; they are ignored by `parse`.
    pub fn overflow(raw: &str, range: &SubjectRange) -> usize {
        raw.trim_end().chars().count().saturating_sub(range.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_chunk_pads_with_blanks() {
        let range = SubjectRange::new("TUR", "Türkçe", 1, 40);
        let raw = "A".repeat(38);
        let parsed = AnswerParser::parse(&raw, &range);

        assert_eq!(parsed.len(), 40);
        assert_eq!(parsed[37].answer, Some(AnswerOption::A));
        assert_eq!(parsed[38], ParsedResponse { question_number: 39, answer: None });
        assert_eq!(parsed[39], ParsedResponse { question_number: 40, answer: None });
    }

    #[test]
    fn invalid_characters_are_blank_and_case_is_ignored() {
        let range = SubjectRange::new("MAT", "Matematik", 41, 46);
        let parsed = AnswerParser::parse("a*b X9", &range);
        let answers: Vec<Option<AnswerOption>> = parsed.iter().map(|p| p.answer).collect();

        assert_eq!(
            answers,
            vec![Some(AnswerOption::A), None, Some(AnswerOption::B), None, None, None]
        );
        assert_eq!(parsed[0].question_number, 41);
        assert_eq!(parsed[5].question_number, 46);
    }

    #[test]
    fn leading_blank_keeps_alignment() {
        let range = SubjectRange::new("FEN", "Fen", 1, 3);
        let parsed = AnswerParser::parse(" CD", &range);
        assert_eq!(parsed[0].answer, None);
        assert_eq!(parsed[1].answer, Some(AnswerOption::C));
        assert_eq!(parsed[2].answer, Some(AnswerOption::D));
    }

    #[test]
    fn overflow_counts_extra_characters() {
        let range = SubjectRange::new("FEN", "Fen", 1, 3);
        assert_eq!(AnswerParser::overflow("ABCDE", &range), 2);
        assert_eq!(AnswerParser::overflow("ABC  \n", &range), 0);
        assert_eq!(AnswerParser::overflow("A", &range), 0);
    }
}
