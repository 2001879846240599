use crate::models::answer_key::CompetencyMap;
use crate::models::exam::SubjectRange;
use crate::models::result::{
    AnswerStatus, ClassSummary, ExamSummary, GradedAnswer, StudentResult, SubjectResult, SubjectSummary,
    TopicResult,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Decimal places kept on net scores.
pub const NET_SCALE: u32 = 4;
/// Decimal places kept on rates and percentiles.
pub const RATE_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub correct: u32,
    pub wrong: u32,
    pub blank: u32,
}

impl Tally {
    pub fn of<'a>(graded: impl IntoIterator<Item = &'a GradedAnswer>) -> Self {
        let mut tally = Self::default();
        for g in graded {
            match g.status {
                AnswerStatus::Correct => tally.correct += 1,
                AnswerStatus::Wrong => tally.wrong += 1,
                AnswerStatus::Blank => tally.blank += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> u32 {
        self.correct + self.wrong + self.blank
    }
}

pub struct AggregationService;

impl AggregationService {
    /// `correct - wrong * coefficient`, rounded to `NET_SCALE` places.
    pub fn net(correct: u32, wrong: u32, coefficient: Decimal) -> Decimal {
        (Decimal::from(correct) - Decimal::from(wrong) * coefficient).round_dp(NET_SCALE)
    }

    pub fn summarize_subject(range: &SubjectRange, graded: &[GradedAnswer], coefficient: Decimal) -> SubjectResult {
        let tally = Tally::of(graded);
        SubjectResult {
            subject_code: range.code.clone(),
            subject_name: range.name.clone(),
            question_count: tally.total(),
            correct: tally.correct,
            wrong: tally.wrong,
            blank: tally.blank,
            net: Self::net(tally.correct, tally.wrong, coefficient),
            weight: range.weight_or_default(),
        }
    }

    /// One row per competency of the exam, including competencies the
    /// participant had no graded question for.
    pub fn topic_results(graded: &[GradedAnswer], competencies: &CompetencyMap) -> Vec<TopicResult> {
        let by_question: HashMap<u32, &GradedAnswer> =
            graded.iter().map(|g| (g.canonical_question_number, g)).collect();

        competencies
            .iter()
            .map(|c| {
                let tally = Tally::of(c.questions.iter().filter_map(|q| by_question.get(q).copied()));
                let total_questions = c.questions.len() as u32;
                TopicResult {
                    competency_code: c.code.clone(),
                    competency_text: c.text.clone(),
                    subject_code: c.subject_code.clone(),
                    total_questions,
                    correct: tally.correct,
                    wrong: tally.wrong,
                    blank: tally.blank,
                    success_rate: Self::success_rate(tally.correct, total_questions),
                }
            })
            .collect()
    }

    pub fn success_rate(correct: u32, total: u32) -> Decimal {
        if total == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(correct) * Decimal::ONE_HUNDRED / Decimal::from(total)).round_dp(RATE_SCALE)
    }

    /// Weighted sum of subject nets plus summed counts.
    pub fn totals(subjects: &[SubjectResult]) -> (Tally, Decimal) {
        let mut tally = Tally::default();
        let mut net = Decimal::ZERO;
        for s in subjects {
            tally.correct += s.correct;
            tally.wrong += s.wrong;
            tally.blank += s.blank;
            net += s.net * s.weight;
        }
        (tally, net.round_dp(NET_SCALE))
    }

    pub fn exam_summary(results: &[StudentResult]) -> ExamSummary {
        if results.is_empty() {
            return ExamSummary::default();
        }

        let count = Decimal::from(results.len() as u64);
        let mut total_net = Decimal::ZERO;
        let mut max_net = results[0].net;
        let mut min_net = results[0].net;
        let mut subjects: BTreeMap<String, (String, u32, Decimal, Decimal)> = BTreeMap::new();
        let mut classes: BTreeMap<String, (u32, Decimal)> = BTreeMap::new();

        for r in results {
            total_net += r.net;
            max_net = max_net.max(r.net);
            min_net = min_net.min(r.net);

            for s in &r.subjects {
                let entry = subjects
                    .entry(s.subject_code.clone())
                    .or_insert_with(|| (s.subject_name.clone(), 0, Decimal::ZERO, Decimal::ZERO));
                entry.1 += 1;
                entry.2 += Decimal::from(s.correct);
                entry.3 += s.net;
            }

            if let Some(class) = r.class_name.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                let entry = classes.entry(class.to_string()).or_insert((0, Decimal::ZERO));
                entry.0 += 1;
                entry.1 += r.net;
            }
        }

        ExamSummary {
            participant_count: results.len() as u32,
            average_net: (total_net / count).round_dp(NET_SCALE),
            max_net,
            min_net,
            subjects: subjects
                .into_iter()
                .map(|(code, (name, n, correct, net))| {
                    let n_dec = Decimal::from(n);
                    SubjectSummary {
                        subject_code: code,
                        subject_name: name,
                        participants: n,
                        average_correct: (correct / n_dec).round_dp(RATE_SCALE),
                        average_net: (net / n_dec).round_dp(NET_SCALE),
                    }
                })
                .collect(),
            classes: classes
                .into_iter()
                .map(|(class_name, (n, net))| ClassSummary {
                    class_name,
                    participants: n,
                    average_net: (net / Decimal::from(n)).round_dp(NET_SCALE),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer_key::AnswerOption;
    use crate::models::exam::default_coefficient;
    use uuid::Uuid;

    fn graded(question: u32, status: AnswerStatus) -> GradedAnswer {
        GradedAnswer {
            participant_id: Uuid::nil(),
            canonical_question_number: question,
            subject_code: "TUR".to_string(),
            given: None,
            expected: AnswerOption::A,
            status,
        }
    }

    #[test]
    fn sixty_correct_thirty_wrong_nets_fifty() {
        assert_eq!(AggregationService::net(60, 30, default_coefficient()), Decimal::from(50));
        assert_eq!(AggregationService::net(10, 4, Decimal::new(25, 2)), Decimal::from(9));
    }

    #[test]
    fn subject_counts_cover_range() {
        let range = SubjectRange::new("TUR", "Türkçe", 1, 4);
        let answers = vec![
            graded(1, AnswerStatus::Correct),
            graded(2, AnswerStatus::Wrong),
            graded(3, AnswerStatus::Blank),
            graded(4, AnswerStatus::Correct),
        ];
        let s = AggregationService::summarize_subject(&range, &answers, default_coefficient());
        assert_eq!((s.correct, s.wrong, s.blank), (2, 1, 1));
        assert_eq!(s.correct + s.wrong + s.blank, range.len() as u32);
        assert_eq!(s.net, Decimal::new(16667, 4));
    }

    #[test]
    fn topic_success_rate_counts_tagged_questions() {
        let mut map = CompetencyMap::default();
        map.tag(1, "T.1", Some("Paragraf"), Some("TUR"));
        map.tag(2, "T.1", None, Some("TUR"));
        map.tag(3, "T.1", None, Some("TUR"));
        map.tag(9, "T.2", None, Some("TUR"));

        let answers = vec![graded(1, AnswerStatus::Correct), graded(2, AnswerStatus::Wrong)];
        let topics = AggregationService::topic_results(&answers, &map);

        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].competency_code, "T.1");
        assert_eq!(topics[0].total_questions, 3);
        assert_eq!(topics[0].correct, 1);
        assert_eq!(topics[0].success_rate, Decimal::new(3333, 2));
        assert_eq!(topics[1].success_rate, Decimal::ZERO);
        assert_eq!(AggregationService::success_rate(0, 0), Decimal::ZERO);
    }

    #[test]
    fn weighted_totals() {
        let mut a = AggregationService::summarize_subject(
            &SubjectRange::new("A", "A", 1, 2),
            &[graded(1, AnswerStatus::Correct), graded(2, AnswerStatus::Correct)],
            default_coefficient(),
        );
        a.weight = Decimal::new(15, 1);
        let b = AggregationService::summarize_subject(
            &SubjectRange::new("B", "B", 3, 3),
            &[graded(3, AnswerStatus::Correct)],
            default_coefficient(),
        );
        let (tally, net) = AggregationService::totals(&[a, b]);
        assert_eq!(tally.correct, 3);
        assert_eq!(net, Decimal::from(4));
    }
}
