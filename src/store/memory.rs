use std::{
    cmp::Reverse,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NotificationStore, StoreError, StoreResult};
use crate::models::{
    dead_letter::{DeadLetter, NewDeadLetter},
    notification::{
        IdempotencyKey, NewNotification, Notification, NotificationStats, RetryWindow,
    },
    response::{Page, Paged},
};

/// Process-local store with the same uniqueness and claim semantics as the
/// PostgreSQL schema. Used by tests and local runs without a database.
#[derive(Default)]
pub struct InMemoryNotificationStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct State {
    notifications: Vec<Notification>,
    dead_letters: Vec<DeadLetter>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every operation fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Direct write access, bypassing the state machine. Test fixtures only.
    pub async fn put(&self, notification: Notification) {
        let mut state = self.state.lock().await;
        state.notifications.retain(|n| n.id != notification.id);
        state.notifications.push(notification);
    }

    pub async fn all(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

fn paginate(mut items: Vec<Notification>, page: Page) -> Paged<Notification> {
    items.sort_by_key(|n| Reverse(n.created_at));
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .collect();

    Paged { items, total }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn find_by_key(&self, key: &IdempotencyKey) -> StoreResult<Option<Notification>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        Ok(state.notifications.iter().find(|n| &n.key() == key).cloned())
    }

    async fn insert_pending(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Option<Notification>> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let key = notification.key();
        if state.notifications.iter().any(|n| n.key() == key) {
            return Ok(None);
        }

        let created = notification.into_pending();
        state.notifications.push(created.clone());
        Ok(Some(created))
    }

    async fn save_outcome(&self, notification: &Notification) -> StoreResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let row = state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification.id)
            .ok_or_else(|| StoreError::Query(format!("notification {} not found", notification.id)))?;

        row.status = notification.status;
        row.content = notification.content.clone();
        row.sent_at = notification.sent_at;
        row.error_message = notification.error_message.clone();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn find_retryable(&self, window: &RetryWindow) -> StoreResult<Vec<Notification>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let mut rows: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.can_retry(window))
            .cloned()
            .collect();
        rows.sort_by_key(|n| n.created_at);
        Ok(rows)
    }

    async fn claim_for_retry(
        &self,
        id: Uuid,
        window: &RetryWindow,
    ) -> StoreResult<Option<Notification>> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.can_retry(window))
        {
            Some(row) => {
                row.mark_as_retry();
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        Ok(state.notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn list_by_user(&self, user_id: i64, page: Page) -> StoreResult<Paged<Notification>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let rows = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn list_by_delivery(
        &self,
        delivery_id: i64,
        page: Page,
    ) -> StoreResult<Paged<Notification>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let rows = state
            .notifications
            .iter()
            .filter(|n| n.delivery_id == delivery_id)
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn list_abandoned(
        &self,
        window: &RetryWindow,
        page: Page,
    ) -> StoreResult<Paged<Notification>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        let rows = state
            .notifications
            .iter()
            .filter(|n| n.is_abandoned(window))
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn stats(&self) -> StoreResult<NotificationStats> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        Ok(NotificationStats::from_counts(
            state.notifications.iter().map(|n| (n.status, 1)),
        ))
    }

    async fn record_dead_letter(&self, entry: NewDeadLetter) -> StoreResult<DeadLetter> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let dead_letter = entry.into_dead_letter();
        state.dead_letters.push(dead_letter.clone());
        Ok(dead_letter)
    }

    async fn list_dead_letters(&self, limit: u64) -> StoreResult<Vec<DeadLetter>> {
        self.ensure_available()?;
        let state = self.state.lock().await;

        Ok(state
            .dead_letters
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_available()
    }
}
