use crate::database::repository::{AuditSink, ExamStore};
use crate::error::{Error, Result};
use crate::models::answer_key::{AnswerOption, BookletAnswerKey, BookletKeySet, CanonicalAnswerRow, ResolvedKeyEntry};
use crate::models::audit_log::{AuditEntry, ACTION_BOOKLET_KEYS_REBUILT};
use crate::models::exam::{same_label, BookletType, Exam, ExamTest};
use crate::services::exam_lock::ExamLocks;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTest {
    pub exam_test_id: Uuid,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub keys: Vec<BookletAnswerKey>,
    pub skipped: Vec<SkippedTest>,
}

#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub exam_id: Uuid,
    pub key_set: BookletKeySet,
    pub skipped: Vec<SkippedTest>,
}

pub struct AnswerKeyResolver;

impl AnswerKeyResolver {
    /// Builds one ordered key per (test, booklet). Tests without matching
    /// answer key rows are reported in `skipped` instead of failing.
    pub fn resolve(
        rows: &[CanonicalAnswerRow],
        tests: &[ExamTest],
        booklets: &[BookletType],
    ) -> Result<ResolveOutcome> {
        Self::check_rows(rows)?;

        let booklets: BTreeSet<BookletType> = booklets.iter().copied().collect();
        let mut keys = Vec::with_capacity(tests.len() * booklets.len());
        let mut skipped = Vec::new();

        for test in tests {
            let matched = Self::rows_for_test(rows, test);
            if matched.is_empty() {
                tracing::warn!(
                    "No answer key rows match test {} [{}]; skipping its booklet keys",
                    test.label(),
                    test.id
                );
                skipped.push(SkippedTest {
                    exam_test_id: test.id,
                    label: test.label(),
                });
                continue;
            }

            for booklet in &booklets {
                let mut entries = Vec::with_capacity(matched.len());
                for row in &matched {
                    entries.push(Self::resolve_entry(row, *booklet)?);
                }
                entries.sort_by_key(|e| (e.booklet_question_number, e.canonical_question_number));
                keys.push(BookletAnswerKey {
                    exam_test_id: test.id,
                    booklet: *booklet,
                    entries,
                });
            }
        }

        Ok(ResolveOutcome { keys, skipped })
    }

    /// Code match (case-insensitive) first; name match only when no code matches.
    pub fn rows_for_test<'a>(rows: &'a [CanonicalAnswerRow], test: &ExamTest) -> Vec<&'a CanonicalAnswerRow> {
        let by_code: Vec<&CanonicalAnswerRow> = rows
            .iter()
            .filter(|r| test.code_matches(r.subject_code.as_deref()))
            .collect();
        if !by_code.is_empty() {
            return by_code;
        }
        rows.iter()
            .filter(|r| match r.subject_name.as_deref() {
                Some(name) => same_label(&test.subject_name, name),
                None => false,
            })
            .collect()
    }

    fn resolve_entry(row: &CanonicalAnswerRow, booklet: BookletType) -> Result<ResolvedKeyEntry> {
        let answer = match row.booklet_answers.get(&booklet) {
            Some(letter) => AnswerOption::parse(letter).ok_or_else(|| {
                Error::MalformedAnswerKey(format!(
                    "booklet {} answer {:?} for question {} is not A-E",
                    booklet, letter, row.question_number
                ))
            })?,
            None => Self::canonical_answer(row)?,
        };

        Ok(ResolvedKeyEntry {
            booklet_question_number: row
                .booklet_question_numbers
                .get(&booklet)
                .copied()
                .unwrap_or(row.question_number),
            answer,
            canonical_question_number: row.question_number,
            competency_code: row.competency_code.clone(),
            competency_text: row.competency_text.clone(),
        })
    }

    fn canonical_answer(row: &CanonicalAnswerRow) -> Result<AnswerOption> {
        AnswerOption::parse(&row.correct_answer).ok_or_else(|| {
            Error::MalformedAnswerKey(format!(
                "correct answer {:?} for question {} is not A-E",
                row.correct_answer, row.question_number
            ))
        })
    }

    fn check_rows(rows: &[CanonicalAnswerRow]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for row in rows {
            if row.question_number == 0 {
                return Err(Error::MalformedAnswerKey("question numbers start at 1".to_string()));
            }
            if !seen.insert(row.question_number) {
                return Err(Error::MalformedAnswerKey(format!(
                    "question {} appears more than once",
                    row.question_number
                )));
            }
            Self::canonical_answer(row)?;
        }
        Ok(())
    }

    /// Hex SHA-256 over the inputs that determine the resolved keys.
    pub fn fingerprint(rows: &[CanonicalAnswerRow], tests: &[ExamTest], booklets: &[BookletType]) -> Result<String> {
        let booklets: BTreeSet<BookletType> = booklets.iter().copied().collect();
        let payload = serde_json::to_vec(&json!({
            "rows": rows,
            "tests": tests,
            "booklets": booklets,
        }))?;
        Ok(hex::encode(Sha256::digest(&payload)))
    }
}

/// Loads the exam's answer key and tests, resolves every booklet key and
/// replaces the stored set. Caller holds the exam lock.
pub(crate) async fn rebuild_booklet_keys<S: ExamStore>(store: &S, exam: &Exam) -> Result<RebuildReport> {
    let rows = store.load_canonical_key(exam.id).await?;
    if rows.is_empty() {
        return Err(Error::NotFound(format!("Answer key not found for exam {}", exam.id)));
    }
    let tests = store.list_exam_tests(exam.id).await?;
    if tests.is_empty() {
        return Err(Error::NotFound(format!("No tests found for exam {}", exam.id)));
    }
    rebuild_from_inputs(store, exam, &rows, &tests).await
}

pub(crate) async fn rebuild_from_inputs<S: ExamStore>(
    store: &S,
    exam: &Exam,
    rows: &[CanonicalAnswerRow],
    tests: &[ExamTest],
) -> Result<RebuildReport> {
    let booklets = exam.booklets();
    let outcome = AnswerKeyResolver::resolve(rows, tests, &booklets)?;
    let key_set = BookletKeySet {
        exam_id: exam.id,
        fingerprint: AnswerKeyResolver::fingerprint(rows, tests, &booklets)?,
        keys: outcome.keys,
    };

    store.replace_booklet_keys(&key_set).await?;
    tracing::info!(
        "Rebuilt {} booklet keys for exam {} ({} tests skipped)",
        key_set.keys.len(),
        exam.id,
        outcome.skipped.len()
    );

    Ok(RebuildReport {
        exam_id: exam.id,
        key_set,
        skipped: outcome.skipped,
    })
}

pub struct BookletKeyService<S, A> {
    store: Arc<S>,
    audit: Arc<A>,
    locks: ExamLocks,
    lock_timeout: Duration,
}

impl<S, A> Clone for BookletKeyService<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            audit: self.audit.clone(),
            locks: self.locks.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<S: ExamStore, A: AuditSink> BookletKeyService<S, A> {
    pub fn new(store: Arc<S>, audit: Arc<A>, locks: ExamLocks, lock_timeout: Duration) -> Self {
        Self {
            store,
            audit,
            locks,
            lock_timeout,
        }
    }

    pub async fn rebuild(&self, exam_id: Uuid) -> Result<RebuildReport> {
        let _guard = self.locks.acquire(exam_id, self.lock_timeout).await?;
        let started = Instant::now();

        let exam = self
            .store
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))?;

        let report = rebuild_booklet_keys(self.store.as_ref(), &exam).await?;

        let entry = AuditEntry {
            action: ACTION_BOOKLET_KEYS_REBUILT.to_string(),
            entity_type: "exam".to_string(),
            entity_id: exam.id,
            description: format!(
                "Rebuilt {} booklet keys for {} ({} tests skipped)",
                report.key_set.keys.len(),
                exam.name,
                report.skipped.len()
            ),
            organization_id: exam.organization_id,
            metadata: Some(json!({
                "fingerprint": report.key_set.fingerprint,
                "skipped_tests": report.skipped.iter().map(|s| s.label.clone()).collect::<Vec<_>>(),
                "duration_ms": started.elapsed().as_millis() as u64,
            })),
        };
        if let Err(e) = self.audit.record(&entry).await {
            tracing::warn!("Failed to write audit record for exam {}: {:?}", exam.id, e);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_for(code: Option<&str>, name: &str) -> ExamTest {
        ExamTest {
            id: Uuid::new_v4(),
            exam_id: Uuid::nil(),
            subject_code: code.map(str::to_string),
            subject_name: name.to_string(),
        }
    }

    #[test]
    fn override_letter_replaces_canonical_answer() {
        let rows = vec![
            CanonicalAnswerRow::new(5, "C", "MAT").with_booklet(BookletType::B, 5, Some("D")),
        ];
        let test = test_for(Some("mat"), "Matematik");
        let outcome = AnswerKeyResolver::resolve(&rows, &[test.clone()], &[BookletType::A, BookletType::B]).unwrap();

        assert_eq!(outcome.keys.len(), 2);
        let a = outcome.keys.iter().find(|k| k.booklet == BookletType::A).unwrap();
        let b = outcome.keys.iter().find(|k| k.booklet == BookletType::B).unwrap();
        assert_eq!(a.entries[0].answer, AnswerOption::C);
        assert_eq!(b.entries[0].answer, AnswerOption::D);
    }

    #[test]
    fn entries_follow_booklet_numbering() {
        let rows = vec![
            CanonicalAnswerRow::new(1, "A", "TUR").with_booklet(BookletType::B, 3, None),
            CanonicalAnswerRow::new(2, "B", "TUR").with_booklet(BookletType::B, 1, None),
            CanonicalAnswerRow::new(3, "C", "TUR").with_booklet(BookletType::B, 2, None),
        ];
        let outcome = AnswerKeyResolver::resolve(&rows, &[test_for(Some("TUR"), "Türkçe")], &[BookletType::B]).unwrap();

        let canon: Vec<u32> = outcome.keys[0].entries.iter().map(|e| e.canonical_question_number).collect();
        assert_eq!(canon, vec![2, 3, 1]);
    }

    #[test]
    fn falls_back_to_subject_name() {
        let mut row = CanonicalAnswerRow::new(1, "E", "X");
        row.subject_code = None;
        row.subject_name = Some("fen bilimleri".to_string());
        let outcome =
            AnswerKeyResolver::resolve(&[row], &[test_for(Some("FEN"), "Fen Bilimleri")], &[BookletType::A]).unwrap();
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.keys[0].entries.len(), 1);
    }

    #[test]
    fn unmatched_test_is_skipped() {
        let rows = vec![CanonicalAnswerRow::new(1, "A", "TUR")];
        let tests = vec![test_for(Some("TUR"), "Türkçe"), test_for(Some("GEO"), "Coğrafya")];
        let outcome = AnswerKeyResolver::resolve(&rows, &tests, &[BookletType::A]).unwrap();

        assert_eq!(outcome.keys.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].exam_test_id, tests[1].id);
    }

    #[test]
    fn invalid_letter_is_malformed() {
        let rows = vec![CanonicalAnswerRow::new(1, "Z", "TUR")];
        let err = AnswerKeyResolver::resolve(&rows, &[test_for(Some("TUR"), "Türkçe")], &[BookletType::A]).unwrap_err();
        assert!(matches!(err, Error::MalformedAnswerKey(_)));
    }

    #[test]
    fn fingerprint_ignores_booklet_order() {
        let rows = vec![CanonicalAnswerRow::new(1, "A", "TUR")];
        let tests = vec![test_for(Some("TUR"), "Türkçe")];
        let a = AnswerKeyResolver::fingerprint(&rows, &tests, &[BookletType::A, BookletType::B]).unwrap();
        let b = AnswerKeyResolver::fingerprint(&rows, &tests, &[BookletType::B, BookletType::A]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
