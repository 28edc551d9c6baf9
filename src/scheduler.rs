use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    models::{
        notification::{Notification, RetryWindow},
        status::NotificationStatus,
    },
    notifiers::{NotificationSender, NotifierRegistry},
    store::{NotificationStore, StoreError},
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub lookback: chrono::Duration,
    pub interval: Duration,
    /// Resends in flight at once during a sweep.
    pub concurrency: usize,
    /// Age after which a PENDING/RETRY row without an outcome counts as failed.
    pub stale_after: chrono::Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retry_count,
            lookback: config.retry_lookback(),
            interval: config.retry_sweep_interval(),
            concurrency: config.retry_sweep_concurrency,
            stale_after: config.stale_after(),
        }
    }

    pub fn window(&self) -> RetryWindow {
        let now = Utc::now();

        RetryWindow {
            max_retries: self.max_retries,
            since: before(now, self.lookback),
            stale_before: before(now, self.stale_after),
        }
    }
}

fn before(now: DateTime<Utc>, age: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

enum RowOutcome {
    Sent,
    Failed,
    Skipped,
    Error,
}

/// Periodic re-attempt of FAILED notifications, and of attempts whose outcome
/// was never saved. Holds no state between sweeps; concurrent instances are
/// kept apart by the store's atomic claim.
pub struct RetryScheduler {
    store: Arc<dyn NotificationStore>,
    registry: NotifierRegistry,
    sender: NotificationSender,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        registry: NotifierRegistry,
        sender: NotificationSender,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            sender,
            policy,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.policy.interval.as_secs(),
            max_retries = self.policy.max_retries,
            concurrency = self.policy.concurrency,
            "Retry scheduler started"
        );

        // `interval` panics on a zero period.
        let mut ticker = interval(self.policy.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retry scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Retry sweep failed");
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let window = self.policy.window();
        let candidates = self.store.find_retryable(&window).await?;

        let mut report = SweepReport {
            selected: candidates.len(),
            ..SweepReport::default()
        };

        if candidates.is_empty() {
            debug!("No failed notifications eligible for retry");
            return Ok(report);
        }

        info!(count = candidates.len(), "Retrying failed notifications");

        let mut outcomes = stream::iter(candidates)
            .map(|notification| self.retry_one(notification, &window))
            .buffer_unordered(self.policy.concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                RowOutcome::Sent => report.sent += 1,
                RowOutcome::Failed => report.failed += 1,
                RowOutcome::Skipped => report.skipped += 1,
                RowOutcome::Error => report.errors += 1,
            }
        }

        info!(
            selected = report.selected,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "Retry sweep finished"
        );

        Ok(report)
    }

    async fn retry_one(&self, candidate: Notification, window: &RetryWindow) -> RowOutcome {
        let id = candidate.id;

        let Some(notifier) = self.registry.get(candidate.channel) else {
            warn!(notification_id = %id, channel = %candidate.channel, "No notifier for channel, leaving row");
            return RowOutcome::Skipped;
        };

        let claimed = match self
            .store
            .claim_for_retry(id, window)
            .await
        {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                debug!(notification_id = %id, "Row claimed elsewhere or no longer eligible");
                return RowOutcome::Skipped;
            }
            Err(e) => {
                error!(notification_id = %id, error = %e, "Failed to claim notification for retry");
                return RowOutcome::Error;
            }
        };

        if candidate.status != NotificationStatus::Failed {
            warn!(
                notification_id = %id,
                status = %candidate.status,
                "Reclaiming notification whose outcome was never saved"
            );
        }

        debug!(notification_id = %id, retry_count = claimed.retry_count, "Resending notification");

        match self.sender.resend(notifier.as_ref(), claimed).await {
            Ok(notification) if notification.status == NotificationStatus::Sent => RowOutcome::Sent,
            Ok(_) => RowOutcome::Failed,
            Err(e) => {
                error!(notification_id = %id, error = %e, "Failed to persist retry outcome");
                RowOutcome::Error
            }
        }
    }
}
