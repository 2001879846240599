#![allow(dead_code)]

use exam_results_engine::database::memory::{MemoryAuditLog, MemoryJobQueue, MemoryStore};
use exam_results_engine::models::answer_key::CanonicalAnswerRow;
use exam_results_engine::models::exam::{BookletType, Exam, ExamTest, ExamType, SubjectRange};
use exam_results_engine::models::participant::{Participant, RawAnswerChunk};
use exam_results_engine::services::answer_key_service::BookletKeyService;
use exam_results_engine::services::exam_lock::ExamLocks;
use exam_results_engine::services::recompute_service::{RecomputeOptions, RecomputeService};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type MemoryRecompute = RecomputeService<MemoryStore, MemoryJobQueue, MemoryAuditLog>;

const LETTERS: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

/// Canonical answer of question `q` in the fixtures.
pub fn key_letter(q: u32) -> char {
    LETTERS[((q - 1) % 5) as usize]
}

/// A letter that is never the canonical answer of `q`.
pub fn wrong_letter(q: u32) -> char {
    LETTERS[(q % 5) as usize]
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub audit: Arc<MemoryAuditLog>,
    pub locks: ExamLocks,
    pub exam: Exam,
    pub exam_type: ExamType,
    pub tests: Vec<ExamTest>,
}

impl Fixture {
    /// Exam with one test per subject and a canonical key covering every
    /// subject range; booklet numbering is identical across booklets.
    pub fn new(subjects: &[(&str, u32, u32)]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let exam_type = ExamType {
            id: Uuid::new_v4(),
            code: "TYT".to_string(),
            name: "Temel Yeterlilik Testi".to_string(),
            subjects: subjects
                .iter()
                .map(|(code, start, end)| SubjectRange::new(*code, format!("{} dersi", code), *start, *end))
                .collect(),
        };
        let exam = Exam::new(Uuid::new_v4(), Uuid::new_v4(), exam_type.id, "Deneme 1");

        let tests: Vec<ExamTest> = subjects
            .iter()
            .map(|(code, _, _)| ExamTest {
                id: Uuid::new_v4(),
                exam_id: exam.id,
                subject_code: Some(code.to_string()),
                subject_name: format!("{} dersi", code),
            })
            .collect();

        let mut rows = Vec::new();
        for (code, start, end) in subjects {
            for q in *start..=*end {
                rows.push(CanonicalAnswerRow::new(q, &key_letter(q).to_string(), code));
            }
        }

        store.insert_exam_type(exam_type.clone());
        store.insert_exam(exam.clone());
        for t in &tests {
            store.insert_test(t.clone());
        }
        store.set_answer_key(exam.id, rows);

        Self {
            store,
            queue: Arc::new(MemoryJobQueue::new()),
            audit: Arc::new(MemoryAuditLog::new()),
            locks: ExamLocks::new(),
            exam,
            exam_type,
            tests,
        }
    }

    pub fn options() -> RecomputeOptions {
        RecomputeOptions {
            batch_size: 1000,
            workers: 2,
            lock_timeout: Duration::from_secs(5),
            ..RecomputeOptions::default()
        }
    }

    pub fn service(&self) -> MemoryRecompute {
        self.service_with(Self::options())
    }

    pub fn service_with(&self, options: RecomputeOptions) -> MemoryRecompute {
        RecomputeService::new(
            self.store.clone(),
            self.queue.clone(),
            self.audit.clone(),
            self.locks.clone(),
            options,
        )
    }

    pub fn key_service(&self) -> BookletKeyService<MemoryStore, MemoryAuditLog> {
        BookletKeyService::new(
            self.store.clone(),
            self.audit.clone(),
            self.locks.clone(),
            Duration::from_secs(5),
        )
    }

    pub fn rows_mut<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<CanonicalAnswerRow>),
    {
        let mut rows = self.store.answer_key(self.exam.id);
        f(&mut rows);
        self.store.set_answer_key(self.exam.id, rows);
    }

    pub fn add_participant(&self, class: Option<&str>, booklet: BookletType, answers: &[(&str, String)]) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_participant(Participant::new(id, self.exam.id, class, booklet));
        for (code, raw) in answers {
            self.store
                .insert_chunk(self.exam.id, RawAnswerChunk::new(id, code, raw));
        }
        id
    }
}

/// Builds an answer string for questions `start..=end`, one char per question.
pub fn answers(start: u32, end: u32, pick: impl Fn(u32) -> char) -> String {
    (start..=end).map(pick).collect()
}

/// Answers the first `correct` questions right, the next `wrong` wrong and
/// leaves the rest blank.
pub fn scored(start: u32, end: u32, correct: u32, wrong: u32) -> String {
    answers(start, end, |q| {
        let offset = q - start;
        if offset < correct {
            key_letter(q)
        } else if offset < correct + wrong {
            wrong_letter(q)
        } else {
            ' '
        }
    })
}
