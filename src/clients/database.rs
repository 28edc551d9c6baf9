use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod,
    Runtime,
};
use tokio_postgres::{NoTls, Row, types::ToSql};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    models::{
        dead_letter::{DeadLetter, NewDeadLetter},
        notification::{
            IdempotencyKey, NewNotification, Notification, NotificationStats, RetryWindow,
        },
        response::{Page, Paged},
        status::{Channel, NotificationStatus},
    },
    store::{NotificationStore, StoreError, StoreResult},
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const NOTIFICATION_COLUMNS: &str = "id, user_id, delivery_id, event_type, channel, recipient, \
     content, status, sent_at, created_at, updated_at, error_message, retry_count";

const DEAD_LETTER_COLUMNS: &str = "id, delivery_id, event_type, payload, reason, received_at";

/// FAILED, or PENDING/RETRY with no write since `$stale` (see `RetryWindow`).
fn failed_or_stranded(stale: usize) -> String {
    format!("(status = 'FAILED' OR (status IN ('PENDING', 'RETRY') AND updated_at <= ${stale}))")
}

/// No connection is opened until the first checkout.
fn build_pool(database_url: &str, max_connections: usize) -> Result<Pool, Error> {
    let mut settings = PoolSettings::new();
    settings.url = Some(database_url.to_string());
    settings.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    settings.pool = Some(PoolConfig::new(max_connections));

    settings
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| anyhow!("Failed to create database pool: {}", e))
}

/// Pooled connections; a dropped connection is replaced on the next checkout.
pub struct PostgresNotificationStore {
    pool: Pool,
}

impl From<PoolError> for StoreError {
    fn from(e: PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Query(e.to_string())
        }
    }
}

impl PostgresNotificationStore {
    pub async fn connect(database_url: &str, max_connections: usize) -> Result<Self, Error> {
        info!(max_connections, "Connecting to PostgreSQL database");

        let pool = build_pool(database_url, max_connections)?;

        let client = pool
            .get()
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to apply database schema: {}", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    async fn client(&self) -> StoreResult<Object> {
        Ok(self.pool.get().await?)
    }

    async fn page_where(
        &self,
        filter: &str,
        params: &[&(dyn ToSql + Sync)],
        page: Page,
    ) -> StoreResult<Paged<Notification>> {
        let client = self.client().await?;
        let total: i64 = client
            .query_one(
                format!("SELECT COUNT(*) FROM notifications WHERE {filter}").as_str(),
                params,
            )
            .await?
            .try_get(0)?;

        let limit = page.limit as i64;
        let offset = page.offset() as i64;
        let mut paged_params: Vec<&(dyn ToSql + Sync)> = params.to_vec();
        paged_params.push(&limit);
        paged_params.push(&offset);

        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE {filter} \
             ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            params.len() + 1,
            params.len() + 2
        );

        let items = client
            .query(sql.as_str(), &paged_params)
            .await?
            .iter()
            .map(notification_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Paged {
            items,
            total: total.max(0) as u64,
        })
    }
}

fn notification_from_row(row: &Row) -> StoreResult<Notification> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        delivery_id: row.try_get("delivery_id")?,
        event_type: row.try_get("event_type")?,
        channel: channel.parse::<Channel>().map_err(StoreError::Corrupt)?,
        recipient: row.try_get("recipient")?,
        content: row.try_get("content")?,
        status: status
            .parse::<NotificationStatus>()
            .map_err(StoreError::Corrupt)?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
    })
}

fn dead_letter_from_row(row: &Row) -> StoreResult<DeadLetter> {
    Ok(DeadLetter {
        id: row.try_get("id")?,
        delivery_id: row.try_get("delivery_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        reason: row.try_get("reason")?,
        received_at: row.try_get("received_at")?,
    })
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn find_by_key(&self, key: &IdempotencyKey) -> StoreResult<Option<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE delivery_id = $1 AND event_type = $2 AND channel = $3"
        );

        self.client()
            .await?
            .query_opt(sql.as_str(), &[&key.delivery_id, &key.event_type, &key.channel.as_str()])
            .await?
            .as_ref()
            .map(notification_from_row)
            .transpose()
    }

    async fn insert_pending(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Option<Notification>> {
        let pending = notification.into_pending();

        let sql = format!(
            "INSERT INTO notifications \
                 (id, user_id, delivery_id, event_type, channel, recipient, status, created_at, updated_at, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, 0) \
             ON CONFLICT ON CONSTRAINT notifications_idempotency_key DO NOTHING \
             RETURNING {NOTIFICATION_COLUMNS}"
        );

        let inserted = self
            .client()
            .await?
            .query_opt(
                sql.as_str(),
                &[
                    &pending.id,
                    &pending.user_id,
                    &pending.delivery_id,
                    &pending.event_type,
                    &pending.channel.as_str(),
                    &pending.recipient,
                    &pending.status.as_str(),
                    &pending.created_at,
                ],
            )
            .await?;

        match inserted {
            Some(row) => {
                debug!(
                    notification_id = %pending.id,
                    delivery_id = pending.delivery_id,
                    channel = %pending.channel,
                    "Pending notification created"
                );
                notification_from_row(&row).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save_outcome(&self, notification: &Notification) -> StoreResult<()> {
        let updated = self
            .client()
            .await?
            .execute(
                "UPDATE notifications \
                 SET status = $2, content = $3, sent_at = $4, error_message = $5, updated_at = now() \
                 WHERE id = $1",
                &[
                    &notification.id,
                    &notification.status.as_str(),
                    &notification.content,
                    &notification.sent_at,
                    &notification.error_message,
                ],
            )
            .await?;

        if updated == 0 {
            return Err(StoreError::Query(format!(
                "notification {} not found",
                notification.id
            )));
        }

        Ok(())
    }

    async fn find_retryable(&self, window: &RetryWindow) -> StoreResult<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE {} AND retry_count < $1 AND created_at > $2 \
             ORDER BY created_at",
            failed_or_stranded(3)
        );

        self.client()
            .await?
            .query(
                sql.as_str(),
                &[&window.max_retries, &window.since, &window.stale_before],
            )
            .await?
            .iter()
            .map(notification_from_row)
            .collect()
    }

    async fn claim_for_retry(
        &self,
        id: Uuid,
        window: &RetryWindow,
    ) -> StoreResult<Option<Notification>> {
        let sql = format!(
            "UPDATE notifications \
             SET status = 'RETRY', retry_count = retry_count + 1, updated_at = now() \
             WHERE id = $1 AND {} AND retry_count < $2 AND created_at > $3 \
             RETURNING {NOTIFICATION_COLUMNS}",
            failed_or_stranded(4)
        );

        self.client()
            .await?
            .query_opt(
                sql.as_str(),
                &[&id, &window.max_retries, &window.since, &window.stale_before],
            )
            .await?
            .as_ref()
            .map(notification_from_row)
            .transpose()
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1");

        self.client()
            .await?
            .query_opt(sql.as_str(), &[&id])
            .await?
            .as_ref()
            .map(notification_from_row)
            .transpose()
    }

    async fn list_by_user(&self, user_id: i64, page: Page) -> StoreResult<Paged<Notification>> {
        self.page_where("user_id = $1", &[&user_id], page).await
    }

    async fn list_by_delivery(
        &self,
        delivery_id: i64,
        page: Page,
    ) -> StoreResult<Paged<Notification>> {
        self.page_where("delivery_id = $1", &[&delivery_id], page)
            .await
    }

    async fn list_abandoned(
        &self,
        window: &RetryWindow,
        page: Page,
    ) -> StoreResult<Paged<Notification>> {
        let filter = format!(
            "{} AND (retry_count >= $1 OR created_at <= $2)",
            failed_or_stranded(3)
        );

        self.page_where(
            &filter,
            &[&window.max_retries, &window.since, &window.stale_before],
            page,
        )
        .await
    }

    async fn stats(&self) -> StoreResult<NotificationStats> {
        let rows = self
            .client()
            .await?
            .query(
                "SELECT status, COUNT(*) AS count FROM notifications GROUP BY status",
                &[],
            )
            .await?;

        let counts = rows
            .iter()
            .map(|row| -> StoreResult<(NotificationStatus, u64)> {
                let status: String = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                let status = status
                    .parse::<NotificationStatus>()
                    .map_err(StoreError::Corrupt)?;
                Ok((status, count.max(0) as u64))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(NotificationStats::from_counts(counts))
    }

    async fn record_dead_letter(&self, entry: NewDeadLetter) -> StoreResult<DeadLetter> {
        let dead_letter = entry.into_dead_letter();

        self.client()
            .await?
            .execute(
                "INSERT INTO dead_letters (id, delivery_id, event_type, payload, reason, received_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &dead_letter.id,
                    &dead_letter.delivery_id,
                    &dead_letter.event_type,
                    &dead_letter.payload,
                    &dead_letter.reason,
                    &dead_letter.received_at,
                ],
            )
            .await?;

        Ok(dead_letter)
    }

    async fn list_dead_letters(&self, limit: u64) -> StoreResult<Vec<DeadLetter>> {
        let sql = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters ORDER BY received_at DESC LIMIT $1"
        );
        let limit = limit as i64;

        self.client()
            .await?
            .query(sql.as_str(), &[&limit])
            .await?
            .iter()
            .map(dead_letter_from_row)
            .collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.client().await?.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}
