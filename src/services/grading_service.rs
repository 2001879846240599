use crate::models::answer_key::ResolvedKeyEntry;
use crate::models::exam::SubjectRange;
use crate::models::result::{AnswerStatus, GradedAnswer};
use crate::services::answer_parser::ParsedResponse;
use std::collections::HashMap;
use uuid::Uuid;

pub struct GradingService;

impl GradingService {
    /// Grades one subject of one participant against the resolved key of the
    /// participant's booklet. Each response is compared with the key entry of
    /// the same canonical question; questions the key does not cover are left
    /// out.
    pub fn grade_subject(
        participant_id: Uuid,
        range: &SubjectRange,
        responses: &[ParsedResponse],
        key: &[ResolvedKeyEntry],
    ) -> Vec<GradedAnswer> {
        let by_canonical: HashMap<u32, &ResolvedKeyEntry> =
            key.iter().map(|e| (e.canonical_question_number, e)).collect();
        let mut graded = Vec::with_capacity(responses.len().min(key.len()));

        for response in responses {
            if !range.contains(response.question_number) {
                continue;
            }
            let Some(entry) = by_canonical.get(&response.question_number) else {
                continue;
            };

            let status = match response.answer {
                None => AnswerStatus::Blank,
                Some(given) if given == entry.answer => AnswerStatus::Correct,
                Some(_) => AnswerStatus::Wrong,
            };

            graded.push(GradedAnswer {
                participant_id,
                canonical_question_number: entry.canonical_question_number,
                subject_code: range.code.clone(),
                given: response.answer,
                expected: entry.answer,
                status,
            });
        }

        graded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer_key::AnswerOption;
    use crate::services::answer_parser::AnswerParser;

    fn entry(booklet_no: u32, canonical: u32, answer: AnswerOption) -> ResolvedKeyEntry {
        ResolvedKeyEntry {
            booklet_question_number: booklet_no,
            answer,
            canonical_question_number: canonical,
            competency_code: None,
            competency_text: None,
        }
    }

    #[test]
    fn booklet_override_makes_canonical_letter_wrong() {
        let range = SubjectRange::new("MAT", "Matematik", 1, 5);
        let key_b = vec![
            entry(1, 1, AnswerOption::A),
            entry(2, 2, AnswerOption::A),
            entry(3, 3, AnswerOption::A),
            entry(4, 4, AnswerOption::A),
            entry(5, 5, AnswerOption::D),
        ];
        let responses = AnswerParser::parse("    C", &range);
        let graded = GradingService::grade_subject(Uuid::nil(), &range, &responses, &key_b);

        let q5 = graded.iter().find(|g| g.canonical_question_number == 5).unwrap();
        assert_eq!(q5.status, AnswerStatus::Wrong);
        assert_eq!(q5.expected, AnswerOption::D);
        assert_eq!(graded.iter().filter(|g| g.status == AnswerStatus::Blank).count(), 4);
    }

    #[test]
    fn reordered_booklet_is_graded_by_canonical_number() {
        let range = SubjectRange::new("TUR", "Türkçe", 1, 2);
        // booklet question 1 is canonical 2
        let key = vec![entry(1, 2, AnswerOption::B), entry(2, 1, AnswerOption::E)];
        let responses = AnswerParser::parse("EB", &range);
        let graded = GradingService::grade_subject(Uuid::nil(), &range, &responses, &key);

        assert_eq!(graded.len(), 2);
        assert_eq!(graded[0].canonical_question_number, 1);
        assert_eq!(graded[0].expected, AnswerOption::E);
        assert_eq!(graded[1].canonical_question_number, 2);
        assert_eq!(graded[1].expected, AnswerOption::B);
        assert!(graded.iter().all(|g| g.status == AnswerStatus::Correct));
    }

    #[test]
    fn gap_in_key_excludes_only_that_question() {
        let range = SubjectRange::new("TUR", "Türkçe", 1, 5);
        let key = vec![
            entry(1, 1, AnswerOption::A),
            entry(3, 3, AnswerOption::C),
            entry(4, 4, AnswerOption::D),
            entry(5, 5, AnswerOption::E),
        ];
        let responses = AnswerParser::parse("ABCDE", &range);
        let graded = GradingService::grade_subject(Uuid::nil(), &range, &responses, &key);

        let numbers: Vec<u32> = graded.iter().map(|g| g.canonical_question_number).collect();
        assert_eq!(numbers, vec![1, 3, 4, 5]);
        assert!(graded.iter().all(|g| g.status == AnswerStatus::Correct));
    }

    #[test]
    fn positions_missing_from_key_are_excluded() {
        let range = SubjectRange::new("FEN", "Fen", 10, 13);
        let key = vec![entry(10, 10, AnswerOption::A), entry(11, 11, AnswerOption::B)];
        let responses = AnswerParser::parse("ABCD", &range);
        let graded = GradingService::grade_subject(Uuid::nil(), &range, &responses, &key);

        assert_eq!(graded.len(), 2);
        assert!(graded.iter().all(|g| g.status == AnswerStatus::Correct));
    }
}
