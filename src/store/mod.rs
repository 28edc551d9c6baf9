//! Persistence seam for notification state.
//!
//! Every write is a single-row atomic statement. The idempotency key
//! `(delivery_id, event_type, channel)` is unique at the store level, so a
//! racing duplicate insert reports "already handled" instead of creating a
//! second row.

mod memory;

pub use memory::InMemoryNotificationStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    dead_letter::{DeadLetter, NewDeadLetter},
    notification::{
        IdempotencyKey, NewNotification, Notification, NotificationStats, RetryWindow,
    },
    response::{Page, Paged},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("notification store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn find_by_key(&self, key: &IdempotencyKey) -> StoreResult<Option<Notification>>;

    /// Inserts a PENDING row. `None` when the idempotency key already exists.
    async fn insert_pending(&self, notification: NewNotification)
    -> StoreResult<Option<Notification>>;

    /// Persists the outcome fields (status, content, sent_at, error_message)
    /// and stamps `updated_at`.
    async fn save_outcome(&self, notification: &Notification) -> StoreResult<()>;

    /// FAILED rows, and stranded PENDING/RETRY rows, inside the window.
    async fn find_retryable(&self, window: &RetryWindow) -> StoreResult<Vec<Notification>>;

    /// Atomically moves an eligible row to RETRY and increments its counter.
    /// `None` when another sweep got there first or the row no longer
    /// qualifies.
    async fn claim_for_retry(
        &self,
        id: Uuid,
        window: &RetryWindow,
    ) -> StoreResult<Option<Notification>>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Notification>>;

    async fn list_by_user(&self, user_id: i64, page: Page) -> StoreResult<Paged<Notification>>;

    async fn list_by_delivery(
        &self,
        delivery_id: i64,
        page: Page,
    ) -> StoreResult<Paged<Notification>>;

    /// Failed (or stranded) rows the scheduler will never pick up again.
    async fn list_abandoned(
        &self,
        window: &RetryWindow,
        page: Page,
    ) -> StoreResult<Paged<Notification>>;

    async fn stats(&self) -> StoreResult<NotificationStats>;

    async fn record_dead_letter(&self, entry: NewDeadLetter) -> StoreResult<DeadLetter>;

    async fn list_dead_letters(&self, limit: u64) -> StoreResult<Vec<DeadLetter>>;

    async fn health_check(&self) -> StoreResult<()>;
}
