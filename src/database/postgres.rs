use crate::database::repository::{AnswerKeyRepository, ExamRepository, ParticipantRepository, ResultRepository};
use crate::error::{Error, Result};
use crate::models::answer_key::{BookletAnswerKey, BookletKeySet, CanonicalAnswerRow, ResolvedKeyEntry};
use crate::models::exam::{BookletType, Exam, ExamTest, ExamType, SubjectRange};
use crate::models::participant::{Participant, RawAnswerChunk};
use crate::models::result::ResultRows;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

const STUDENT_RESULT_COLUMNS: usize = 12;
const SUBJECT_RESULT_COLUMNS: usize = 9;
const TOPIC_RESULT_COLUMNS: usize = 9;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Rows per multi-row insert: the configured batch size, capped so one
/// statement stays within the bind parameter limit.
fn rows_per_insert(batch_size: usize, columns: usize) -> usize {
    batch_size.clamp(1, MAX_BIND_PARAMS / columns)
}

#[derive(Debug, FromRow)]
struct ExamRow {
    id: Uuid,
    organization_id: Uuid,
    exam_type_id: Uuid,
    name: String,
    negative_coefficient: Decimal,
    booklet_types: Vec<String>,
}

#[derive(Debug, FromRow)]
struct ExamTypeRow {
    id: Uuid,
    code: String,
    name: String,
}

#[derive(Debug, FromRow)]
struct SubjectRow {
    code: String,
    name: String,
    start_question: i32,
    end_question: i32,
    weight: Option<Decimal>,
}

#[derive(Debug, FromRow)]
struct AnswerKeyRow {
    question_number: i32,
    correct_answer: String,
    subject_code: Option<String>,
    subject_name: Option<String>,
    booklet_question_numbers: Option<Json<BTreeMap<BookletType, i32>>>,
    booklet_answers: Option<Json<BTreeMap<BookletType, String>>>,
    competency_code: Option<String>,
    competency_text: Option<String>,
}

#[derive(Debug, FromRow)]
struct BookletKeyRow {
    exam_test_id: Uuid,
    booklet_type: String,
    fingerprint: String,
    entries: Json<Vec<ResolvedKeyEntry>>,
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    id: Uuid,
    exam_id: Uuid,
    student_id: Option<Uuid>,
    full_name: Option<String>,
    class_name: Option<String>,
    booklet_type: Option<String>,
}

fn to_u32(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::BadRequest(format!("Negative {} in storage: {}", what, value)))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Internal(format!("Value {} does not fit an INT column", value)))
}

impl ExamRepository for PgStore {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"SELECT id, organization_id, exam_type_id, name, negative_coefficient, booklet_types
               FROM exams WHERE id = $1"#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut booklet_types = Vec::with_capacity(row.booklet_types.len());
        for raw in &row.booklet_types {
            match raw.parse::<BookletType>() {
                Ok(b) => booklet_types.push(b),
                Err(_) => tracing::warn!("Exam {} lists unknown booklet type {:?}; ignoring it", row.id, raw),
            }
        }

        Ok(Some(Exam {
            id: row.id,
            organization_id: row.organization_id,
            exam_type_id: row.exam_type_id,
            name: row.name,
            negative_coefficient: row.negative_coefficient,
            booklet_types,
        }))
    }

    async fn find_exam_type(&self, exam_type_id: Uuid) -> Result<Option<ExamType>> {
        let row = sqlx::query_as::<_, ExamTypeRow>(r#"SELECT id, code, name FROM exam_types WHERE id = $1"#)
            .bind(exam_type_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let subject_rows = sqlx::query_as::<_, SubjectRow>(
            r#"SELECT code, name, start_question, end_question, weight
               FROM exam_type_subjects
               WHERE exam_type_id = $1
               ORDER BY sort_order, start_question"#,
        )
        .bind(exam_type_id)
        .fetch_all(&self.pool)
        .await?;

        let mut subjects = Vec::with_capacity(subject_rows.len());
        for s in subject_rows {
            subjects.push(SubjectRange {
                code: s.code,
                name: s.name,
                start: to_u32(s.start_question, "subject start")?,
                end: to_u32(s.end_question, "subject end")?,
                weight: s.weight,
            });
        }

        Ok(Some(ExamType {
            id: row.id,
            code: row.code,
            name: row.name,
            subjects,
        }))
    }

    async fn list_exam_tests(&self, exam_id: Uuid) -> Result<Vec<ExamTest>> {
        let tests = sqlx::query_as::<_, (Uuid, Uuid, Option<String>, String)>(
            r#"SELECT id, exam_id, subject_code, subject_name
               FROM exam_tests WHERE exam_id = $1
               ORDER BY sort_order, id"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, exam_id, subject_code, subject_name)| ExamTest {
            id,
            exam_id,
            subject_code,
            subject_name,
        })
        .collect();
        Ok(tests)
    }
}

impl AnswerKeyRepository for PgStore {
    async fn load_canonical_key(&self, exam_id: Uuid) -> Result<Vec<CanonicalAnswerRow>> {
        let rows = sqlx::query_as::<_, AnswerKeyRow>(
            r#"SELECT question_number, correct_answer, subject_code, subject_name,
                      booklet_question_numbers, booklet_answers, competency_code, competency_text
               FROM answer_keys WHERE exam_id = $1
               ORDER BY question_number"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let question_number = u32::try_from(row.question_number).map_err(|_| {
                Error::MalformedAnswerKey(format!("question number {} is negative", row.question_number))
            })?;
            let mut booklet_question_numbers = BTreeMap::new();
            for (booklet, number) in row.booklet_question_numbers.map(|j| j.0).unwrap_or_default() {
                let number = u32::try_from(number).map_err(|_| {
                    Error::MalformedAnswerKey(format!(
                        "booklet {} number {} for question {} is negative",
                        booklet, number, question_number
                    ))
                })?;
                booklet_question_numbers.insert(booklet, number);
            }
            out.push(CanonicalAnswerRow {
                question_number,
                correct_answer: row.correct_answer,
                subject_code: row.subject_code,
                subject_name: row.subject_name,
                booklet_question_numbers,
                booklet_answers: row.booklet_answers.map(|j| j.0).unwrap_or_default(),
                competency_code: row.competency_code,
                competency_text: row.competency_text,
            });
        }
        Ok(out)
    }

    async fn load_booklet_keys(&self, exam_id: Uuid) -> Result<Option<BookletKeySet>> {
        let rows = sqlx::query_as::<_, BookletKeyRow>(
            r#"SELECT exam_test_id, booklet_type, fingerprint, entries
               FROM booklet_answer_keys WHERE exam_id = $1
               ORDER BY position"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let fingerprint = first.fingerprint.clone();

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(BookletAnswerKey {
                exam_test_id: row.exam_test_id,
                booklet: row.booklet_type.parse()?,
                entries: row.entries.0,
            });
        }

        Ok(Some(BookletKeySet {
            exam_id,
            fingerprint,
            keys,
        }))
    }

    async fn replace_booklet_keys(&self, keys: &BookletKeySet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("booklet_keys:{}", keys.exam_id))
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM booklet_answer_keys WHERE exam_id = $1")
            .bind(keys.exam_id)
            .execute(&mut *tx)
            .await?;

        if !keys.keys.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO booklet_answer_keys (exam_id, exam_test_id, booklet_type, position, fingerprint, entries) ",
            );
            let mut position: i32 = 0;
            qb.push_values(&keys.keys, |mut b, key| {
                b.push_bind(keys.exam_id)
                    .push_bind(key.exam_test_id)
                    .push_bind(key.booklet.as_str())
                    .push_bind(position)
                    .push_bind(keys.fingerprint.as_str())
                    .push_bind(Json(key.entries.clone()));
                position += 1;
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

impl ParticipantRepository for PgStore {
    async fn list_participants(&self, exam_id: Uuid) -> Result<Vec<Participant>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"SELECT id, exam_id, student_id, full_name, class_name, booklet_type
               FROM participants WHERE exam_id = $1
               ORDER BY id"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let booklet = row.booklet_type.as_deref().and_then(|raw| match raw.parse::<BookletType>() {
                    Ok(b) => Some(b),
                    Err(_) => {
                        tracing::warn!("Participant {} has unreadable booklet {:?}", row.id, raw);
                        None
                    }
                });
                Participant {
                    id: row.id,
                    exam_id: row.exam_id,
                    student_id: row.student_id,
                    full_name: row.full_name,
                    class_name: row.class_name,
                    booklet,
                }
            })
            .collect())
    }

    async fn list_answer_chunks(&self, exam_id: Uuid) -> Result<Vec<RawAnswerChunk>> {
        let chunks = sqlx::query_as::<_, (Uuid, String, String)>(
            r#"SELECT pa.participant_id, pa.subject_code, pa.answers
               FROM participant_answers pa
               JOIN participants p ON p.id = pa.participant_id
               WHERE p.exam_id = $1
               ORDER BY pa.participant_id, pa.subject_code"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(participant_id, subject_code, answers)| RawAnswerChunk {
            participant_id,
            subject_code,
            answers,
        })
        .collect();
        Ok(chunks)
    }
}

impl ResultRepository for PgStore {
    async fn replace_results(&self, exam_id: Uuid, rows: &ResultRows, batch_size: usize) -> Result<()> {
        let student_batch = rows_per_insert(batch_size, STUDENT_RESULT_COLUMNS);
        let subject_batch = rows_per_insert(batch_size, SUBJECT_RESULT_COLUMNS);
        let topic_batch = rows_per_insert(batch_size, TOPIC_RESULT_COLUMNS);
        if student_batch < batch_size {
            tracing::warn!(
                "Insert batch size {} exceeds the bind parameter limit; using {} student rows per insert",
                batch_size,
                student_batch
            );
        }
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("exam_results:{}", exam_id))
            .execute(&mut *tx)
            .await?;

        // subject/topic rows go with their parents via ON DELETE CASCADE
        let deleted = sqlx::query("DELETE FROM student_results WHERE exam_id = $1")
            .bind(exam_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tracing::debug!("Deleted {} student results for exam {}", deleted, exam_id);

        let mut ids_by_seq: HashMap<i32, Uuid> = HashMap::with_capacity(rows.students.len());
        for (batch_no, chunk) in rows.students.chunks(student_batch).enumerate() {
            let mut bound = Vec::with_capacity(chunk.len());
            for r in chunk {
                bound.push((
                    r,
                    to_i32(r.seq)?,
                    to_i32(r.total_correct)?,
                    to_i32(r.total_wrong)?,
                    to_i32(r.total_blank)?,
                    to_i32(r.rank_in_exam)?,
                    r.rank_in_class.map(to_i32).transpose()?,
                ));
            }

            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO student_results (exam_id, participant_id, seq, class_name, booklet_type, \
                 total_correct, total_wrong, total_blank, net, rank_in_exam, rank_in_class, percentile) ",
            );
            qb.push_values(&bound, |mut b, (r, seq, correct, wrong, blank, rank, class_rank)| {
                b.push_bind(exam_id)
                    .push_bind(r.participant_id)
                    .push_bind(*seq)
                    .push_bind(r.class_name.clone())
                    .push_bind(r.booklet.map(|bk| bk.as_str()))
                    .push_bind(*correct)
                    .push_bind(*wrong)
                    .push_bind(*blank)
                    .push_bind(r.net)
                    .push_bind(*rank)
                    .push_bind(*class_rank)
                    .push_bind(r.percentile);
            });
            qb.push(" RETURNING seq, id");
            let inserted: Vec<(i32, Uuid)> = qb.build_query_as().fetch_all(&mut *tx).await?;
            tracing::debug!("Inserted student result batch {} ({} rows)", batch_no, inserted.len());
            ids_by_seq.extend(inserted);
        }

        let parent_of = |seq: u32| -> Result<Uuid> {
            ids_by_seq
                .get(&to_i32(seq)?)
                .copied()
                .ok_or_else(|| Error::Internal(format!("No student result row for seq {}", seq)))
        };

        let mut subjects = Vec::with_capacity(rows.subjects.len());
        for row in &rows.subjects {
            let s = &row.subject;
            subjects.push((
                parent_of(row.student_seq)?,
                s,
                to_i32(s.question_count)?,
                to_i32(s.correct)?,
                to_i32(s.wrong)?,
                to_i32(s.blank)?,
            ));
        }
        for chunk in subjects.chunks(subject_batch) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO subject_results (student_result_id, subject_code, subject_name, \
                 question_count, correct, wrong, blank, net, weight) ",
            );
            qb.push_values(chunk, |mut b, (parent, s, count, correct, wrong, blank)| {
                b.push_bind(*parent)
                    .push_bind(s.subject_code.clone())
                    .push_bind(s.subject_name.clone())
                    .push_bind(*count)
                    .push_bind(*correct)
                    .push_bind(*wrong)
                    .push_bind(*blank)
                    .push_bind(s.net)
                    .push_bind(s.weight);
            });
            qb.build().execute(&mut *tx).await?;
        }

        let mut topics = Vec::with_capacity(rows.topics.len());
        for row in &rows.topics {
            let t = &row.topic;
            topics.push((
                parent_of(row.student_seq)?,
                t,
                to_i32(t.total_questions)?,
                to_i32(t.correct)?,
                to_i32(t.wrong)?,
                to_i32(t.blank)?,
            ));
        }
        for chunk in topics.chunks(topic_batch) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO topic_results (student_result_id, subject_code, competency_code, competency_text, \
                 total_questions, correct, wrong, blank, success_rate) ",
            );
            qb.push_values(chunk, |mut b, (parent, t, total, correct, wrong, blank)| {
                b.push_bind(*parent)
                    .push_bind(t.subject_code.clone())
                    .push_bind(t.competency_code.clone())
                    .push_bind(t.competency_text.clone())
                    .push_bind(*total)
                    .push_bind(*correct)
                    .push_bind(*wrong)
                    .push_bind(*blank)
                    .push_bind(t.success_rate);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_batches_respect_bind_limit() {
        assert_eq!(rows_per_insert(1000, STUDENT_RESULT_COLUMNS), 1000);
        assert_eq!(rows_per_insert(10_000, STUDENT_RESULT_COLUMNS), 5461);
        assert_eq!(rows_per_insert(10_000, SUBJECT_RESULT_COLUMNS), 7281);
        assert_eq!(rows_per_insert(0, TOPIC_RESULT_COLUMNS), 1);
        assert!(rows_per_insert(usize::MAX, STUDENT_RESULT_COLUMNS) * STUDENT_RESULT_COLUMNS <= MAX_BIND_PARAMS);
    }
}
