use crate::database::repository::AuditSink;
use crate::error::Result;
use crate::models::audit_log::{AuditEntry, AuditLog};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, entry: &AuditEntry) -> Result<AuditLog> {
        let row = sqlx::query_as::<_, AuditLog>(
            r#"
            INSERT INTO audit_logs (organization_id, action, entity_type, entity_id, description, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, organization_id, action, entity_type, entity_id, description, metadata, created_at
            "#,
        )
        .bind(entry.organization_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.description)
        .bind(&entry.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

impl AuditSink for AuditService {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.log(entry).await?;
        Ok(())
    }
}
