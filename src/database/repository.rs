use crate::error::Result;
use crate::models::answer_key::{BookletKeySet, CanonicalAnswerRow, CompetencyMap};
use crate::models::audit_log::AuditEntry;
use crate::models::exam::{Exam, ExamTest, ExamType};
use crate::models::job::AnalyticsJobRequest;
use crate::models::participant::{Participant, RawAnswerChunk};
use crate::models::result::ResultRows;
use std::future::Future;
use uuid::Uuid;

pub trait ExamRepository: Send + Sync {
    fn find_exam(&self, exam_id: Uuid) -> impl Future<Output = Result<Option<Exam>>> + Send;

    fn find_exam_type(&self, exam_type_id: Uuid) -> impl Future<Output = Result<Option<ExamType>>> + Send;

    fn list_exam_tests(&self, exam_id: Uuid) -> impl Future<Output = Result<Vec<ExamTest>>> + Send;
}

pub trait AnswerKeyRepository: Send + Sync {
    /// Master answer key rows, ordered by canonical question number.
    fn load_canonical_key(&self, exam_id: Uuid) -> impl Future<Output = Result<Vec<CanonicalAnswerRow>>> + Send;

    fn load_competency_map(&self, exam_id: Uuid) -> impl Future<Output = Result<CompetencyMap>> + Send {
        async move {
            let rows = self.load_canonical_key(exam_id).await?;
            Ok(CompetencyMap::from_rows(&rows))
        }
    }

    /// `None` when no booklet keys have been persisted for the exam.
    fn load_booklet_keys(&self, exam_id: Uuid) -> impl Future<Output = Result<Option<BookletKeySet>>> + Send;

    /// Drops every stored booklet key of the exam and stores `keys` instead.
    fn replace_booklet_keys(&self, keys: &BookletKeySet) -> impl Future<Output = Result<()>> + Send;
}

pub trait ParticipantRepository: Send + Sync {
    fn list_participants(&self, exam_id: Uuid) -> impl Future<Output = Result<Vec<Participant>>> + Send;

    fn list_answer_chunks(&self, exam_id: Uuid) -> impl Future<Output = Result<Vec<RawAnswerChunk>>> + Send;
}

pub trait ResultRepository: Send + Sync {
    /// Drops every stored result row of the exam and stores `rows` instead,
    /// writing at most `batch_size` rows per insert.
    fn replace_results(
        &self,
        exam_id: Uuid,
        rows: &ResultRows,
        batch_size: usize,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait ExamStore: ExamRepository + AnswerKeyRepository + ParticipantRepository + ResultRepository {}

impl<T> ExamStore for T where T: ExamRepository + AnswerKeyRepository + ParticipantRepository + ResultRepository {}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: &AnalyticsJobRequest) -> impl Future<Output = Result<()>> + Send;
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>> + Send;
}
