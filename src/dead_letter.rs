use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::{
    models::{
        dead_letter::{DeadLetter, NewDeadLetter},
        event::normalize_id,
    },
    store::NotificationStore,
};

pub const UNKNOWN_REASON: &str = "unknown";

/// End of the line for events the pipeline could not process. Archives what
/// it can and never asks for redelivery.
#[derive(Clone)]
pub struct DeadLetterHandler {
    store: Arc<dyn NotificationStore>,
}

impl DeadLetterHandler {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Returns the archived entry, or `None` when archiving failed. Either way
    /// the message is to be acknowledged.
    pub async fn handle(&self, payload: &[u8], reason: Option<&str>) -> Option<DeadLetter> {
        let entry = dead_letter_entry(payload, reason);

        warn!(
            delivery_id = ?entry.delivery_id,
            event_type = ?entry.event_type,
            reason = %entry.reason,
            "Event reached dead-letter queue"
        );

        match self.store.record_dead_letter(entry).await {
            Ok(archived) => Some(archived),
            Err(e) => {
                error!(error = %e, "Failed to archive dead-lettered event");
                None
            }
        }
    }
}

pub fn dead_letter_entry(payload: &[u8], reason: Option<&str>) -> NewDeadLetter {
    let payload = serde_json::from_slice::<Value>(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));

    let delivery_id = payload.get("deliveryId").and_then(normalize_id);
    let event_type = payload
        .get("eventType")
        .and_then(Value::as_str)
        .map(str::to_string);

    NewDeadLetter {
        delivery_id,
        event_type,
        payload,
        reason: reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(UNKNOWN_REASON)
            .to_string(),
    }
}
