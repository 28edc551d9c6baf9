use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// An event the pipeline gave up on, archived for offline inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub delivery_id: Option<i64>,
    pub event_type: Option<String>,
    pub payload: JsonValue,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub delivery_id: Option<i64>,
    pub event_type: Option<String>,
    pub payload: JsonValue,
    pub reason: String,
}

impl NewDeadLetter {
    pub fn into_dead_letter(self) -> DeadLetter {
        DeadLetter {
            id: Uuid::new_v4(),
            delivery_id: self.delivery_id,
            event_type: self.event_type,
            payload: self.payload,
            reason: self.reason,
            received_at: Utc::now(),
        }
    }
}
