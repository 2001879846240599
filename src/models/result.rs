use crate::models::answer_key::AnswerOption;
use crate::models::exam::BookletType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Correct,
    Wrong,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub participant_id: Uuid,
    pub canonical_question_number: u32,
    pub subject_code: String,
    pub given: Option<AnswerOption>,
    pub expected: AnswerOption,
    pub status: AnswerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectResult {
    pub subject_code: String,
    pub subject_name: String,
    pub question_count: u32,
    pub correct: u32,
    pub wrong: u32,
    pub blank: u32,
    pub net: Decimal,
    pub weight: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResult {
    pub competency_code: String,
    pub competency_text: Option<String>,
    pub subject_code: Option<String>,
    pub total_questions: u32,
    pub correct: u32,
    pub wrong: u32,
    pub blank: u32,
    pub success_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentResult {
    /// Stable row key, assigned after ranking and before persistence.
    pub seq: u32,
    pub exam_id: Uuid,
    pub participant_id: Uuid,
    pub class_name: Option<String>,
    pub booklet: Option<BookletType>,
    pub total_correct: u32,
    pub total_wrong: u32,
    pub total_blank: u32,
    pub net: Decimal,
    pub rank_in_exam: u32,
    pub rank_in_class: Option<u32>,
    pub percentile: Decimal,
    pub subjects: Vec<SubjectResult>,
    pub topics: Vec<TopicResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentResultRow {
    pub seq: u32,
    pub exam_id: Uuid,
    pub participant_id: Uuid,
    pub class_name: Option<String>,
    pub booklet: Option<BookletType>,
    pub total_correct: u32,
    pub total_wrong: u32,
    pub total_blank: u32,
    pub net: Decimal,
    pub rank_in_exam: u32,
    pub rank_in_class: Option<u32>,
    pub percentile: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectResultRow {
    pub student_seq: u32,
    pub subject: SubjectResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResultRow {
    pub student_seq: u32,
    pub topic: TopicResult,
}

/// Flattened, persistence-ready form of a result set. Children point at their
/// parent through `student_seq`, never through array position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRows {
    pub students: Vec<StudentResultRow>,
    pub subjects: Vec<SubjectResultRow>,
    pub topics: Vec<TopicResultRow>,
}

impl ResultRows {
    pub fn from_results(results: &[StudentResult]) -> Self {
        let mut rows = Self::default();
        for r in results {
            rows.students.push(StudentResultRow {
                seq: r.seq,
                exam_id: r.exam_id,
                participant_id: r.participant_id,
                class_name: r.class_name.clone(),
                booklet: r.booklet,
                total_correct: r.total_correct,
                total_wrong: r.total_wrong,
                total_blank: r.total_blank,
                net: r.net,
                rank_in_exam: r.rank_in_exam,
                rank_in_class: r.rank_in_class,
                percentile: r.percentile,
            });
            rows.subjects.extend(r.subjects.iter().map(|s| SubjectResultRow {
                student_seq: r.seq,
                subject: s.clone(),
            }));
            rows.topics.extend(r.topics.iter().map(|t| TopicResultRow {
                student_seq: r.seq,
                topic: t.clone(),
            }));
        }
        rows
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject_code: String,
    pub subject_name: String,
    pub participants: u32,
    pub average_correct: Decimal,
    pub average_net: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class_name: String,
    pub participants: u32,
    pub average_net: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamSummary {
    pub participant_count: u32,
    pub average_net: Decimal,
    pub max_net: Decimal,
    pub min_net: Decimal,
    pub subjects: Vec<SubjectSummary>,
    pub classes: Vec<ClassSummary>,
}
