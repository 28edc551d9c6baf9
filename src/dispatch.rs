use std::sync::Arc;

use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    clients::user::RecipientResolver,
    models::{event::DeliveryEvent, notification::IdempotencyKey, status::Channel},
    notifiers::{NotificationSender, NotifierRegistry, template_params},
    store::{NotificationStore, StoreError},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("recipient lookup failed: {0:#}")]
    Lookup(anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to an event that should be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NoRecipient {
        reason: String,
    },
    Dispatched {
        launched: Vec<Channel>,
        duplicates: Vec<Channel>,
        disabled: Vec<Channel>,
    },
}

/// Turns one delivery event into at most one notification per channel.
/// Sends run as tracked background tasks; `handle` returns once they are
/// launched.
#[derive(Clone)]
pub struct DispatchCoordinator {
    store: Arc<dyn NotificationStore>,
    recipients: Arc<dyn RecipientResolver>,
    registry: NotifierRegistry,
    sender: NotificationSender,
    tasks: TaskTracker,
    tracking_base_url: String,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        recipients: Arc<dyn RecipientResolver>,
        registry: NotifierRegistry,
        sender: NotificationSender,
        tasks: TaskTracker,
        tracking_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            recipients,
            registry,
            sender,
            tasks,
            tracking_base_url: tracking_base_url.into(),
        }
    }

    pub async fn handle(&self, event: &DeliveryEvent) -> Result<DispatchOutcome, DispatchError> {
        let Some(user_id) = event.user_id else {
            warn!(
                delivery_id = event.delivery_id,
                event_type = %event.event_type,
                "Event carries no userId, nothing to notify"
            );
            return Ok(DispatchOutcome::NoRecipient {
                reason: "missing userId".to_string(),
            });
        };

        let user = match self
            .recipients
            .find_user(user_id)
            .await
            .map_err(DispatchError::Lookup)?
        {
            Some(user) => user,
            None => {
                warn!(
                    delivery_id = event.delivery_id,
                    user_id, "User not found, dropping event"
                );
                return Ok(DispatchOutcome::NoRecipient {
                    reason: format!("user {} not found", user_id),
                });
            }
        };

        let params = template_params(event, &user, &self.tracking_base_url);

        let mut launched = Vec::new();
        let mut duplicates = Vec::new();
        let mut disabled = Vec::new();

        for (channel, recipient) in user.contacts() {
            let Some(notifier) = self.registry.get(channel) else {
                debug!(delivery_id = event.delivery_id, channel = %channel, "Channel disabled");
                disabled.push(channel);
                continue;
            };

            let key = IdempotencyKey::new(event, channel);
            if self.store.find_by_key(&key).await?.is_some() {
                info!(
                    delivery_id = event.delivery_id,
                    event_type = %event.event_type,
                    channel = %channel,
                    "Notification already handled, skipping channel"
                );
                duplicates.push(channel);
                continue;
            }

            // The unique key decides concurrent duplicates that both passed the lookup.
            let Some(notification) = self.sender.open(user_id, event, channel, recipient).await?
            else {
                duplicates.push(channel);
                continue;
            };

            let sender = self.sender.clone();
            let params = params.clone();

            self.tasks.spawn(async move {
                let id = notification.id;
                if let Err(e) = sender.attempt(notifier.as_ref(), notification, &params).await {
                    error!(
                        notification_id = %id,
                        channel = %channel,
                        error = %e,
                        "Failed to persist notification outcome"
                    );
                }
            });

            launched.push(channel);
        }

        info!(
            delivery_id = event.delivery_id,
            event_type = %event.event_type,
            user_id,
            launched = launched.len(),
            duplicates = duplicates.len(),
            disabled = disabled.len(),
            "Event dispatched"
        );

        Ok(DispatchOutcome::Dispatched {
            launched,
            duplicates,
            disabled,
        })
    }
}
