use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

pub const ACTION_RESULTS_RECOMPUTED: &str = "exam_results_recomputed";
pub const ACTION_BOOKLET_KEYS_REBUILT: &str = "booklet_keys_rebuilt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub description: String,
    pub organization_id: Uuid,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub description: String,
    pub metadata: Option<JsonValue>,
    pub created_at: Option<DateTime<Utc>>,
}
