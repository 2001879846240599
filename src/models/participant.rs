use crate::models::exam::BookletType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Option<Uuid>,
    pub full_name: Option<String>,
    pub class_name: Option<String>,
    pub booklet: Option<BookletType>,
}

impl Participant {
    pub fn new(id: Uuid, exam_id: Uuid, class_name: Option<&str>, booklet: BookletType) -> Self {
        Self {
            id,
            exam_id,
            student_id: None,
            full_name: None,
            class_name: class_name.map(str::to_string),
            booklet: Some(booklet),
        }
    }

    /// Trimmed class label; blank labels count as no class.
    pub fn class_label(&self) -> Option<&str> {
        self.class_name
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// One participant's concatenated responses for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAnswerChunk {
    pub participant_id: Uuid,
    pub subject_code: String,
    pub answers: String,
}

impl RawAnswerChunk {
    pub fn new(participant_id: Uuid, subject_code: &str, answers: &str) -> Self {
        Self {
            participant_id,
            subject_code: subject_code.to_string(),
            answers: answers.to_string(),
        }
    }
}
