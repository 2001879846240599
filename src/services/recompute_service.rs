use crate::database::repository::{AuditSink, ExamStore, JobQueue};
use crate::error::{Error, Result};
use crate::models::answer_key::{BookletKeySet, CompetencyMap, ResolvedKeyEntry};
use crate::models::audit_log::{AuditEntry, ACTION_RESULTS_RECOMPUTED};
use crate::models::exam::{BookletType, Exam, ExamTest, ExamType, SubjectRange};
use crate::models::job::AnalyticsJobRequest;
use crate::models::participant::{Participant, RawAnswerChunk};
use crate::models::result::{ExamSummary, ResultRows, StudentResult};
use crate::services::aggregation_service::AggregationService;
use crate::services::answer_key_service::{rebuild_from_inputs, AnswerKeyResolver};
use crate::services::answer_parser::AnswerParser;
use crate::services::exam_lock::ExamLocks;
use crate::services::grading_service::GradingService;
use crate::services::ranking_service::RankingService;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecomputeOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub analytics_job_type: String,
    pub analytics_job_priority: i32,
    pub lock_timeout: Duration,
    pub force_key_rebuild: bool,
}

impl Default for RecomputeOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: crate::config::default_workers(),
            analytics_job_type: "exam_analytics".to_string(),
            analytics_job_priority: 5,
            lock_timeout: Duration::from_secs(300),
            force_key_rebuild: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecomputeReport {
    pub exam_id: Uuid,
    pub participant_count: usize,
    pub gradable_questions: usize,
    pub keys_rebuilt: bool,
    pub skipped_tests: Vec<String>,
    pub summary: ExamSummary,
    pub analytics_enqueued: bool,
    pub audited: bool,
    pub duration_ms: u64,
}

/// One subject of the exam type together with the resolved key per booklet of
/// the test it was matched to. Empty `keys` means the subject is not graded.
#[derive(Debug, Clone)]
struct SubjectPlan {
    range: SubjectRange,
    keys: BTreeMap<BookletType, Vec<ResolvedKeyEntry>>,
}

struct ScoringContext {
    exam_id: Uuid,
    coefficient: Decimal,
    fallback_booklet: BookletType,
    subjects: Vec<SubjectPlan>,
    competencies: CompetencyMap,
}

impl ScoringContext {
    fn score(&self, participant: &Participant, answers: &HashMap<String, String>) -> StudentResult {
        let booklet = participant.booklet.unwrap_or(self.fallback_booklet);
        let mut subjects = Vec::with_capacity(self.subjects.len());
        let mut graded = Vec::new();

        for plan in &self.subjects {
            let Some(key) = plan.keys.get(&booklet) else {
                continue;
            };
            let raw = answers
                .get(&plan.range.code.to_uppercase())
                .map(String::as_str)
                .unwrap_or("");
            if AnswerParser::overflow(raw, &plan.range) > 0 {
                tracing::warn!(
                    "Participant {} answered past the end of {}; extra characters ignored",
                    participant.id,
                    plan.range.code
                );
            }

            let responses = AnswerParser::parse(raw, &plan.range);
            let subject_graded = GradingService::grade_subject(participant.id, &plan.range, &responses, key);
            subjects.push(AggregationService::summarize_subject(
                &plan.range,
                &subject_graded,
                self.coefficient,
            ));
            graded.extend(subject_graded);
        }

        let topics = AggregationService::topic_results(&graded, &self.competencies);
        let (tally, net) = AggregationService::totals(&subjects);

        StudentResult {
            seq: 0,
            exam_id: self.exam_id,
            participant_id: participant.id,
            class_name: participant.class_label().map(str::to_string),
            booklet: Some(booklet),
            total_correct: tally.correct,
            total_wrong: tally.wrong,
            total_blank: tally.blank,
            net,
            rank_in_exam: 0,
            rank_in_class: None,
            percentile: Decimal::ZERO,
            subjects,
            topics,
        }
    }
}

pub struct RecomputeService<S, Q, A> {
    store: Arc<S>,
    queue: Arc<Q>,
    audit: Arc<A>,
    locks: ExamLocks,
    options: RecomputeOptions,
}

impl<S, Q, A> Clone for RecomputeService<S, Q, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            audit: self.audit.clone(),
            locks: self.locks.clone(),
            options: self.options.clone(),
        }
    }
}

impl<S, Q, A> RecomputeService<S, Q, A>
where
    S: ExamStore + 'static,
    Q: JobQueue + 'static,
    A: AuditSink + 'static,
{
    pub fn new(store: Arc<S>, queue: Arc<Q>, audit: Arc<A>, locks: ExamLocks, options: RecomputeOptions) -> Self {
        Self {
            store,
            queue,
            audit,
            locks,
            options,
        }
    }

    /// Full recompute of one exam: refresh stale booklet keys, grade, aggregate
    /// and rank every participant, then replace the stored results. Queue and
    /// audit failures are logged and never fail the run.
    pub async fn recompute(&self, exam_id: Uuid) -> Result<RecomputeReport> {
        let _guard = self.locks.acquire(exam_id, self.options.lock_timeout).await?;
        let started = Instant::now();
        tracing::info!("Recompute started for exam {}", exam_id);

        let exam = self
            .store
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))?;
        exam.validate_scoring()?;
        let exam_type = self
            .store
            .find_exam_type(exam.exam_type_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam type {} not found for exam {}", exam.exam_type_id, exam_id)))?;
        exam_type.validate_layout()?;

        let (key_set, keys_rebuilt, skipped_tests, tests) = self.current_keys(&exam).await?;
        let competencies = self.store.load_competency_map(exam_id).await?;
        let participants = self.store.list_participants(exam_id).await?;
        let chunks = self.store.list_answer_chunks(exam_id).await?;

        let context = Arc::new(build_context(&exam, &exam_type, &tests, &key_set, competencies));
        let gradable_questions = context
            .subjects
            .iter()
            .filter_map(|p| p.keys.values().next().map(Vec::len))
            .sum::<usize>();
        if gradable_questions == 0 {
            tracing::warn!("Exam {} has no gradable questions; results will be all zero", exam_id);
        }
        let allowed = exam.booklets();
        for p in &participants {
            match p.booklet {
                None => tracing::warn!(
                    "Participant {} has no booklet; grading with booklet {}",
                    p.id,
                    context.fallback_booklet
                ),
                Some(b) if !allowed.contains(&b) => tracing::warn!(
                    "Participant {} sat booklet {}, which exam {} does not use; their subjects are not graded",
                    p.id,
                    b,
                    exam_id
                ),
                Some(_) => {}
            }
        }

        let mut results = self.score_all(context, participants, chunks).await?;
        RankingService::apply(&mut results);
        let summary = AggregationService::exam_summary(&results);

        let rows = ResultRows::from_results(&results);
        self.store
            .replace_results(exam_id, &rows, self.options.batch_size)
            .await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let analytics_enqueued = self.enqueue_analytics(&exam, &summary).await;
        let audited = self
            .write_audit(&exam, results.len(), duration_ms, keys_rebuilt, &summary)
            .await;

        tracing::info!(
            "Recompute finished for exam {}: {} participants, {} questions, {} ms",
            exam_id,
            results.len(),
            gradable_questions,
            duration_ms
        );

        Ok(RecomputeReport {
            exam_id,
            participant_count: results.len(),
            gradable_questions,
            keys_rebuilt,
            skipped_tests,
            summary,
            analytics_enqueued,
            audited,
            duration_ms,
        })
    }

    /// Stored booklet keys when their fingerprint still matches the inputs,
    /// otherwise freshly rebuilt ones.
    async fn current_keys(&self, exam: &Exam) -> Result<(BookletKeySet, bool, Vec<String>, Vec<ExamTest>)> {
        let rows = self.store.load_canonical_key(exam.id).await?;
        let tests = self.store.list_exam_tests(exam.id).await?;
        if rows.is_empty() || tests.is_empty() {
            tracing::warn!(
                "Exam {} has {} answer key rows and {} tests; nothing can be graded",
                exam.id,
                rows.len(),
                tests.len()
            );
            let empty = BookletKeySet::empty(exam.id);
            let stale = self.store.load_booklet_keys(exam.id).await?;
            if stale.is_some_and(|k| !k.keys.is_empty()) {
                tracing::warn!("Clearing stored booklet keys of exam {}", exam.id);
                self.store.replace_booklet_keys(&empty).await?;
            }
            return Ok((empty, false, Vec::new(), tests));
        }

        let fingerprint = AnswerKeyResolver::fingerprint(&rows, &tests, &exam.booklets())?;
        if !self.options.force_key_rebuild {
            if let Some(stored) = self.store.load_booklet_keys(exam.id).await? {
                if stored.fingerprint == fingerprint {
                    // stored sets do not carry skipped tests
                    let skipped = tests
                        .iter()
                        .filter(|t| AnswerKeyResolver::rows_for_test(&rows, t).is_empty())
                        .map(ExamTest::label)
                        .collect();
                    return Ok((stored, false, skipped, tests));
                }
            }
        }

        let report = rebuild_from_inputs(self.store.as_ref(), exam, &rows, &tests).await?;
        let skipped = report.skipped.into_iter().map(|s| s.label).collect();
        Ok((report.key_set, true, skipped, tests))
    }

    async fn score_all(
        &self,
        context: Arc<ScoringContext>,
        participants: Vec<Participant>,
        chunks: Vec<RawAnswerChunk>,
    ) -> Result<Vec<StudentResult>> {
        if participants.is_empty() {
            return Ok(Vec::new());
        }

        let mut answers: HashMap<Uuid, HashMap<String, String>> = HashMap::new();
        for chunk in chunks {
            answers
                .entry(chunk.participant_id)
                .or_default()
                .insert(chunk.subject_code.trim().to_uppercase(), chunk.answers);
        }
        let answers = Arc::new(answers);

        let workers = self.options.workers.max(1);
        let per_worker = participants.len().div_ceil(workers);
        let indexed: Vec<(usize, Participant)> = participants.into_iter().enumerate().collect();

        let mut set = JoinSet::new();
        for batch in indexed.chunks(per_worker) {
            let batch = batch.to_vec();
            let context = context.clone();
            let answers = answers.clone();
            set.spawn_blocking(move || {
                let empty = HashMap::new();
                batch
                    .into_iter()
                    .map(|(idx, p)| {
                        let theirs = answers.get(&p.id).unwrap_or(&empty);
                        (idx, context.score(&p, theirs))
                    })
                    .collect::<Vec<_>>()
            });
        }

        let mut scored = Vec::with_capacity(indexed.len());
        while let Some(batch) = set.join_next().await {
            scored.extend(batch?);
        }
        scored.sort_by_key(|(idx, _)| *idx);
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    async fn enqueue_analytics(&self, exam: &Exam, summary: &ExamSummary) -> bool {
        let job = AnalyticsJobRequest {
            exam_id: exam.id,
            job_type: self.options.analytics_job_type.clone(),
            priority: self.options.analytics_job_priority,
            params: json!({
                "organization_id": exam.organization_id,
                "participant_count": summary.participant_count,
                "average_net": summary.average_net,
            }),
        };
        match self.queue.enqueue(&job).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to enqueue analytics for exam {}: {:?}", exam.id, e);
                false
            }
        }
    }

    async fn write_audit(
        &self,
        exam: &Exam,
        participants: usize,
        duration_ms: u64,
        keys_rebuilt: bool,
        summary: &ExamSummary,
    ) -> bool {
        let entry = AuditEntry {
            action: ACTION_RESULTS_RECOMPUTED.to_string(),
            entity_type: "exam".to_string(),
            entity_id: exam.id,
            description: format!(
                "Recomputed results of {} for {} participants in {} ms",
                exam.name, participants, duration_ms
            ),
            organization_id: exam.organization_id,
            metadata: Some(json!({
                "participant_count": participants,
                "duration_ms": duration_ms,
                "booklet_keys_rebuilt": keys_rebuilt,
                "summary": summary,
            })),
        };
        match self.audit.record(&entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to write audit record for exam {}: {:?}", exam.id, e);
                false
            }
        }
    }
}

fn build_context(
    exam: &Exam,
    exam_type: &ExamType,
    tests: &[ExamTest],
    key_set: &BookletKeySet,
    competencies: CompetencyMap,
) -> ScoringContext {
    let mut ranges = exam_type.subjects.clone();
    ranges.sort_by_key(|r| r.start);

    let subjects = ranges
        .into_iter()
        .map(|range| {
            let keys = match ExamTest::find_for_range(tests, &range) {
                Some(test) => key_set.keys_for_test(test.id),
                None => {
                    tracing::warn!("No test of exam {} covers subject {}; it is not graded", exam.id, range.code);
                    BTreeMap::new()
                }
            };
            for (booklet, entries) in &keys {
                if entries.len() != range.len() {
                    tracing::warn!(
                        "Booklet {} key of {} has {} entries for a {}-question range",
                        booklet,
                        range.code,
                        entries.len(),
                        range.len()
                    );
                }
            }
            SubjectPlan { range, keys }
        })
        .collect();

    ScoringContext {
        exam_id: exam.id,
        coefficient: exam.negative_coefficient,
        fallback_booklet: exam.booklets()[0],
        subjects,
        competencies,
    }
}
