use crate::database::repository::JobQueue;
use crate::error::Result;
use crate::models::job::AnalyticsJobRequest;
use sqlx::PgPool;
use uuid::Uuid;

/// Writes downstream analytics jobs into the `analytics_jobs` table, where the
/// analytics worker picks them up.
#[derive(Clone)]
pub struct AnalyticsQueueService {
    pool: PgPool,
}

impl AnalyticsQueueService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn pending_for_exam(&self, exam_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM analytics_jobs WHERE exam_id = $1 AND status = 'pending'"#,
        )
        .bind(exam_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

impl JobQueue for AnalyticsQueueService {
    async fn enqueue(&self, job: &AnalyticsJobRequest) -> Result<()> {
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO analytics_jobs (exam_id, job_type, priority, params, status)
               VALUES ($1, $2, $3, $4, 'pending')
               RETURNING id"#,
        )
        .bind(job.exam_id)
        .bind(&job.job_type)
        .bind(job.priority)
        .bind(&job.params)
        .fetch_one(&self.pool)
        .await?;
        tracing::debug!("Enqueued {} job {} for exam {}", job.job_type, id, job.exam_id);
        Ok(())
    }
}
