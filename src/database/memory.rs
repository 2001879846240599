use crate::database::repository::{
    AnswerKeyRepository, AuditSink, ExamRepository, JobQueue, ParticipantRepository, ResultRepository,
};
use crate::error::{Error, Result};
use crate::models::answer_key::{BookletKeySet, CanonicalAnswerRow};
use crate::models::audit_log::AuditEntry;
use crate::models::exam::{Exam, ExamTest, ExamType};
use crate::models::job::AnalyticsJobRequest;
use crate::models::participant::{Participant, RawAnswerChunk};
use crate::models::result::{ResultRows, StudentResultRow, SubjectResultRow, TopicResultRow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoredResults {
    students: Vec<(Uuid, StudentResultRow)>,
    subjects: Vec<(Uuid, SubjectResultRow)>,
    topics: Vec<(Uuid, TopicResultRow)>,
}

#[derive(Debug, Default)]
struct Tables {
    exams: HashMap<Uuid, Exam>,
    exam_types: HashMap<Uuid, ExamType>,
    tests: HashMap<Uuid, Vec<ExamTest>>,
    answer_keys: HashMap<Uuid, Vec<CanonicalAnswerRow>>,
    booklet_keys: HashMap<Uuid, BookletKeySet>,
    participants: HashMap<Uuid, Vec<Participant>>,
    chunks: HashMap<Uuid, Vec<RawAnswerChunk>>,
    results: HashMap<Uuid, StoredResults>,
}

/// In-process store. Replace operations build the new state aside and swap it
/// in under the lock, so readers never see a half-written exam.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    booklet_key_writes: AtomicUsize,
    result_writes: AtomicUsize,
    insert_batches: AtomicUsize,
    fail_result_batch: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_exam_type(&self, exam_type: ExamType) {
        self.tables().exam_types.insert(exam_type.id, exam_type);
    }

    pub fn insert_exam(&self, exam: Exam) {
        self.tables().exams.insert(exam.id, exam);
    }

    pub fn insert_test(&self, test: ExamTest) {
        self.tables().tests.entry(test.exam_id).or_default().push(test);
    }

    pub fn set_answer_key(&self, exam_id: Uuid, rows: Vec<CanonicalAnswerRow>) {
        self.tables().answer_keys.insert(exam_id, rows);
    }

    pub fn answer_key(&self, exam_id: Uuid) -> Vec<CanonicalAnswerRow> {
        self.tables().answer_keys.get(&exam_id).cloned().unwrap_or_default()
    }

    pub fn insert_participant(&self, participant: Participant) {
        self.tables()
            .participants
            .entry(participant.exam_id)
            .or_default()
            .push(participant);
    }

    pub fn insert_chunk(&self, exam_id: Uuid, chunk: RawAnswerChunk) {
        self.tables().chunks.entry(exam_id).or_default().push(chunk);
    }

    pub fn booklet_keys(&self, exam_id: Uuid) -> Option<BookletKeySet> {
        self.tables().booklet_keys.get(&exam_id).cloned()
    }

    pub fn student_rows(&self, exam_id: Uuid) -> Vec<StudentResultRow> {
        self.tables()
            .results
            .get(&exam_id)
            .map(|r| r.students.iter().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    pub fn subject_rows(&self, exam_id: Uuid) -> Vec<SubjectResultRow> {
        self.tables()
            .results
            .get(&exam_id)
            .map(|r| r.subjects.iter().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    pub fn topic_rows(&self, exam_id: Uuid) -> Vec<TopicResultRow> {
        self.tables()
            .results
            .get(&exam_id)
            .map(|r| r.topics.iter().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    /// Subject rows whose parent id resolves to a stored student row of the
    /// same participant.
    pub fn subject_rows_for(&self, exam_id: Uuid, participant_id: Uuid) -> Vec<SubjectResultRow> {
        let tables = self.tables();
        let Some(results) = tables.results.get(&exam_id) else {
            return Vec::new();
        };
        let parent_ids: Vec<Uuid> = results
            .students
            .iter()
            .filter(|(_, s)| s.participant_id == participant_id)
            .map(|(id, _)| *id)
            .collect();
        results
            .subjects
            .iter()
            .filter(|(parent, _)| parent_ids.contains(parent))
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub fn booklet_key_writes(&self) -> usize {
        self.booklet_key_writes.load(Ordering::SeqCst)
    }

    pub fn result_writes(&self) -> usize {
        self.result_writes.load(Ordering::SeqCst)
    }

    pub fn insert_batches(&self) -> usize {
        self.insert_batches.load(Ordering::SeqCst)
    }

    /// Makes the n-th (0-based) student insert batch of the next result
    /// replace fail.
    pub fn fail_result_batch(&self, batch: Option<usize>) {
        *self.fail_result_batch.lock().unwrap_or_else(|e| e.into_inner()) = batch;
    }
}

impl ExamRepository for MemoryStore {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        Ok(self.tables().exams.get(&exam_id).cloned())
    }

    async fn find_exam_type(&self, exam_type_id: Uuid) -> Result<Option<ExamType>> {
        Ok(self.tables().exam_types.get(&exam_type_id).cloned())
    }

    async fn list_exam_tests(&self, exam_id: Uuid) -> Result<Vec<ExamTest>> {
        Ok(self.tables().tests.get(&exam_id).cloned().unwrap_or_default())
    }
}

impl AnswerKeyRepository for MemoryStore {
    async fn load_canonical_key(&self, exam_id: Uuid) -> Result<Vec<CanonicalAnswerRow>> {
        let mut rows = self.tables().answer_keys.get(&exam_id).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.question_number);
        Ok(rows)
    }

    async fn load_booklet_keys(&self, exam_id: Uuid) -> Result<Option<BookletKeySet>> {
        Ok(self.booklet_keys(exam_id))
    }

    async fn replace_booklet_keys(&self, keys: &BookletKeySet) -> Result<()> {
        let mut tables = self.tables();
        if keys.keys.is_empty() {
            tables.booklet_keys.remove(&keys.exam_id);
        } else {
            tables.booklet_keys.insert(keys.exam_id, keys.clone());
        }
        drop(tables);
        self.booklet_key_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ParticipantRepository for MemoryStore {
    async fn list_participants(&self, exam_id: Uuid) -> Result<Vec<Participant>> {
        Ok(self.tables().participants.get(&exam_id).cloned().unwrap_or_default())
    }

    async fn list_answer_chunks(&self, exam_id: Uuid) -> Result<Vec<RawAnswerChunk>> {
        Ok(self.tables().chunks.get(&exam_id).cloned().unwrap_or_default())
    }
}

impl ResultRepository for MemoryStore {
    async fn replace_results(&self, exam_id: Uuid, rows: &ResultRows, batch_size: usize) -> Result<()> {
        let batch_size = batch_size.max(1);
        let fail_at = *self.fail_result_batch.lock().unwrap_or_else(|e| e.into_inner());

        let mut staged = StoredResults::default();
        let mut ids_by_seq: HashMap<u32, Uuid> = HashMap::with_capacity(rows.students.len());
        for (batch_no, chunk) in rows.students.chunks(batch_size).enumerate() {
            if fail_at == Some(batch_no) {
                return Err(Error::Internal(format!(
                    "student result batch {} rejected by store",
                    batch_no
                )));
            }
            for row in chunk {
                let id = Uuid::new_v4();
                ids_by_seq.insert(row.seq, id);
                staged.students.push((id, row.clone()));
            }
            self.insert_batches.fetch_add(1, Ordering::SeqCst);
        }

        let parent_of = |seq: u32| -> Result<Uuid> {
            ids_by_seq
                .get(&seq)
                .copied()
                .ok_or_else(|| Error::Internal(format!("No student result row for seq {}", seq)))
        };
        for chunk in rows.subjects.chunks(batch_size) {
            for row in chunk {
                staged.subjects.push((parent_of(row.student_seq)?, row.clone()));
            }
            self.insert_batches.fetch_add(1, Ordering::SeqCst);
        }
        for chunk in rows.topics.chunks(batch_size) {
            for row in chunk {
                staged.topics.push((parent_of(row.student_seq)?, row.clone()));
            }
            self.insert_batches.fetch_add(1, Ordering::SeqCst);
        }

        self.tables().results.insert(exam_id, staged);
        self.result_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Collects enqueued jobs; can be switched to fail every call.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<AnalyticsJobRequest>>,
    unavailable: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<AnalyticsJobRequest> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &AnalyticsJobRequest) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Internal("job queue unavailable".to_string()));
        }
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).push(job.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    unavailable: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Internal("audit log unavailable".to_string()));
        }
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(entry.clone());
        Ok(())
    }
}
