use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsJobRequest {
    pub exam_id: Uuid,
    pub job_type: String,
    pub priority: i32,
    pub params: JsonValue,
}
