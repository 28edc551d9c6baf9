//! Channel notifiers and the send contract they share.
//!
//! A [`Notifier`] knows how to validate, render and transmit for one channel.
//! [`NotificationSender`] drives a notifier through one attempt and persists
//! the outcome, so transport failures end up in the record rather than in the
//! caller's error path.

pub mod email;
pub mod sms;
pub mod template;

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    models::{
        event::DeliveryEvent,
        notification::{NewNotification, Notification},
        status::Channel,
    },
    store::{NotificationStore, StoreResult},
};

pub use email::EmailNotifier;
pub use sms::SmsNotifier;
pub use template::{TemplateParams, template_params};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> Channel;

    fn supports(&self, channel: Channel) -> bool {
        self.channel() == channel
    }

    fn validate_recipient(&self, recipient: &str) -> Result<(), Error>;

    fn render(&self, event_type: &str, params: &TemplateParams) -> Result<String, Error>;

    /// Exactly one provider call. Never retries.
    async fn transmit(&self, recipient: &str, event_type: &str, content: &str)
    -> Result<(), Error>;
}

/// Channel → notifier lookup used by the coordinator and the scheduler.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<Channel, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, notifier: Arc<dyn Notifier>) -> Self {
        info!(channel = %notifier.channel(), "Notifier registered");
        self.notifiers.insert(notifier.channel(), notifier);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn Notifier>> {
        self.notifiers
            .get(&channel)
            .filter(|notifier| notifier.supports(channel))
            .cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.notifiers.keys().copied().collect();
        channels.sort_by_key(|channel| channel.as_str());
        channels
    }
}

#[derive(Clone)]
pub struct NotificationSender {
    store: Arc<dyn NotificationStore>,
    send_timeout: Duration,
}

impl NotificationSender {
    pub fn new(store: Arc<dyn NotificationStore>, send_timeout: Duration) -> Self {
        Self {
            store,
            send_timeout,
        }
    }

    /// `open` followed by `attempt`. `None` when the key was already handled.
    pub async fn send(
        &self,
        notifier: &dyn Notifier,
        user_id: i64,
        event: &DeliveryEvent,
        recipient: &str,
        params: &TemplateParams,
    ) -> StoreResult<Option<Notification>> {
        match self.open(user_id, event, notifier.channel(), recipient).await? {
            Some(notification) => Ok(Some(self.attempt(notifier, notification, params).await?)),
            None => Ok(None),
        }
    }

    /// Creates the PENDING row. `None` when the idempotency key already exists.
    pub async fn open(
        &self,
        user_id: i64,
        event: &DeliveryEvent,
        channel: Channel,
        recipient: &str,
    ) -> StoreResult<Option<Notification>> {
        let notification = self
            .store
            .insert_pending(NewNotification::new(user_id, event, channel, recipient))
            .await?;

        if notification.is_none() {
            debug!(
                delivery_id = event.delivery_id,
                event_type = %event.event_type,
                channel = %channel,
                "Notification already recorded for key"
            );
        }

        Ok(notification)
    }

    /// Validates, renders and transmits once, then persists the outcome.
    /// Only store failures are returned as errors; the row is then left
    /// PENDING and the scheduler reclaims it once it goes stale.
    pub async fn attempt(
        &self,
        notifier: &dyn Notifier,
        mut notification: Notification,
        params: &TemplateParams,
    ) -> StoreResult<Notification> {
        match prepare(notifier, &notification, params) {
            Ok(content) => {
                // Stored before transmit so a stranded row can still be resent.
                notification.content = Some(content.clone());
                self.store.save_outcome(&notification).await?;
                self.transmit(notifier, &mut notification, &content).await;
            }
            Err(e) => {
                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    error = %e,
                    "Notification rejected before transmit"
                );
                notification.mark_as_failed(format!("{:#}", e));
            }
        }

        self.store.save_outcome(&notification).await?;
        Ok(notification)
    }

    /// Transmits the stored content of an existing record again.
    pub async fn resend(
        &self,
        notifier: &dyn Notifier,
        mut notification: Notification,
    ) -> StoreResult<Notification> {
        let content = notification
            .content
            .clone()
            .filter(|content| !content.is_empty());

        match content {
            Some(content) => match notifier.validate_recipient(&notification.recipient) {
                Ok(()) => self.transmit(notifier, &mut notification, &content).await,
                Err(e) => notification.mark_as_failed(format!("Invalid recipient: {}", e)),
            },
            None => notification.mark_as_failed("Invalid notification: no rendered content to resend"),
        }

        self.store.save_outcome(&notification).await?;
        Ok(notification)
    }

    async fn transmit(&self, notifier: &dyn Notifier, notification: &mut Notification, content: &str) {
        let outcome = timeout(
            self.send_timeout,
            notifier.transmit(&notification.recipient, &notification.event_type, content),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                notification.mark_as_sent();
                info!(
                    notification_id = %notification.id,
                    delivery_id = notification.delivery_id,
                    channel = %notification.channel,
                    "Notification sent"
                );
            }
            Ok(Err(e)) => {
                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    error = %e,
                    "Notification send failed"
                );
                notification.mark_as_failed(format!("{} send failed: {}", notification.channel, e));
            }
            Err(_) => {
                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    timeout_secs = self.send_timeout.as_secs(),
                    "Notification send timed out"
                );
                notification.mark_as_failed(format!(
                    "{} send timed out after {:?}",
                    notification.channel, self.send_timeout
                ));
            }
        }
    }
}

fn prepare(
    notifier: &dyn Notifier,
    notification: &Notification,
    params: &TemplateParams,
) -> Result<String, Error> {
    notifier
        .validate_recipient(&notification.recipient)
        .map_err(|e| e.context("Invalid recipient"))?;

    notifier
        .render(&notification.event_type, params)
        .map_err(|e| e.context("Template render failed"))
}
