use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    event::DeliveryEvent,
    status::{Channel, NotificationStatus},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: i64,
    pub delivery_id: i64,
    pub event_type: String,
    pub channel: Channel,
    pub recipient: String,
    pub content: Option<String>,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

/// (deliveryId, eventType, channel): at most one notification exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub delivery_id: i64,
    pub event_type: String,
    pub channel: Channel,
}

/// Which rows the retry scheduler may pick up, and which it has given up on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryWindow {
    pub max_retries: i32,
    /// Oldest `created_at` still inside the lookback window.
    pub since: DateTime<Utc>,
    /// PENDING or RETRY rows not written since this instant lost their
    /// outcome and count as failed.
    pub stale_before: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub delivery_id: i64,
    pub event_type: String,
    pub channel: Channel,
    pub recipient: String,
}

impl NewNotification {
    pub fn new(user_id: i64, event: &DeliveryEvent, channel: Channel, recipient: &str) -> Self {
        Self {
            user_id,
            delivery_id: event.delivery_id,
            event_type: event.event_type.clone(),
            channel,
            recipient: recipient.to_string(),
        }
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            delivery_id: self.delivery_id,
            event_type: self.event_type.clone(),
            channel: self.channel,
        }
    }

    pub fn into_pending(self) -> Notification {
        let now = Utc::now();

        Notification {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            delivery_id: self.delivery_id,
            event_type: self.event_type,
            channel: self.channel,
            recipient: self.recipient,
            content: None,
            status: NotificationStatus::Pending,
            sent_at: None,
            created_at: now,
            updated_at: now,
            error_message: None,
            retry_count: 0,
        }
    }
}

impl IdempotencyKey {
    pub fn new(event: &DeliveryEvent, channel: Channel) -> Self {
        Self {
            delivery_id: event.delivery_id,
            event_type: event.event_type.clone(),
            channel,
        }
    }
}

impl Notification {
    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            delivery_id: self.delivery_id,
            event_type: self.event_type.clone(),
            channel: self.channel,
        }
    }

    /// An attempt whose outcome was never persisted, e.g. the store failed
    /// or the process died between claim and save.
    pub fn is_stranded(&self, stale_before: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            NotificationStatus::Pending | NotificationStatus::Retry
        ) && self.updated_at <= stale_before
    }

    fn is_failed(&self, window: &RetryWindow) -> bool {
        self.status == NotificationStatus::Failed || self.is_stranded(window.stale_before)
    }

    /// Eligible for a scheduled retry under the given budget and window.
    pub fn can_retry(&self, window: &RetryWindow) -> bool {
        self.is_failed(window)
            && self.retry_count < window.max_retries
            && self.created_at > window.since
    }

    /// Failed for good: out of budget or outside the lookback window.
    pub fn is_abandoned(&self, window: &RetryWindow) -> bool {
        self.is_failed(window)
            && (self.retry_count >= window.max_retries || self.created_at <= window.since)
    }

    pub fn mark_as_retry(&mut self) {
        self.status = NotificationStatus::Retry;
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_as_sent(&mut self) {
        let now = Utc::now();
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_as_failed(&mut self, error: impl Into<String>) {
        self.status = NotificationStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total_count: u64,
    pub pending_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub retry_count: u64,
    pub success_rate: f64,
}

impl NotificationStats {
    pub fn from_counts(counts: impl IntoIterator<Item = (NotificationStatus, u64)>) -> Self {
        let mut stats = Self::default();

        for (status, count) in counts {
            match status {
                NotificationStatus::Pending => stats.pending_count += count,
                NotificationStatus::Sent => stats.sent_count += count,
                NotificationStatus::Failed => stats.failed_count += count,
                NotificationStatus::Retry => stats.retry_count += count,
            }
            stats.total_count += count;
        }

        if stats.total_count > 0 {
            stats.success_rate = stats.sent_count as f64 / stats.total_count as f64;
        }

        stats
    }
}
