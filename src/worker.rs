//! Bus consumers: event workers feeding the dispatch coordinator and the
//! dead-letter worker feeding the dead-letter handler.

use anyhow::Error;
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    Consumer,
    types::{AMQPValue, FieldTable},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::rbmq::WorkerChannel,
    dead_letter::DeadLetterHandler,
    dispatch::{DispatchCoordinator, DispatchOutcome},
    models::event::DeliveryEvent,
};

pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";
pub const DEATH_REASON_HEADER: &str = "x-first-death-reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter,
}

/// Ack on success; on failure requeue until the message has been delivered
/// `max_delivery_attempts` times, then let the broker dead-letter it.
/// `delivery_count` is the number of earlier deliveries.
pub fn disposition<T, E>(
    result: &Result<T, E>,
    delivery_count: u32,
    max_delivery_attempts: u32,
) -> Disposition {
    match result {
        Ok(_) => Disposition::Ack,
        Err(_) if delivery_count.saturating_add(1) < max_delivery_attempts => Disposition::Requeue,
        Err(_) => Disposition::DeadLetter,
    }
}

fn header<'a>(headers: &'a Option<FieldTable>, name: &str) -> Option<&'a AMQPValue> {
    headers
        .as_ref()?
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

/// Earlier deliveries of this message as tracked by a quorum queue.
pub fn delivery_count(headers: &Option<FieldTable>) -> u32 {
    let count = match header(headers, DELIVERY_COUNT_HEADER) {
        Some(AMQPValue::LongLongInt(n)) => *n,
        Some(AMQPValue::LongInt(n)) => i64::from(*n),
        Some(AMQPValue::LongUInt(n)) => i64::from(*n),
        Some(AMQPValue::ShortInt(n)) => i64::from(*n),
        Some(AMQPValue::ShortUInt(n)) => i64::from(*n),
        Some(AMQPValue::ShortShortInt(n)) => i64::from(*n),
        Some(AMQPValue::ShortShortUInt(n)) => i64::from(*n),
        _ => 0,
    };

    count.clamp(0, i64::from(u32::MAX)) as u32
}

pub fn death_reason(headers: &Option<FieldTable>) -> Option<String> {
    match header(headers, DEATH_REASON_HEADER)? {
        AMQPValue::LongString(reason) => Some(String::from_utf8_lossy(reason.as_bytes()).into_owned()),
        AMQPValue::ShortString(reason) => Some(reason.as_str().to_string()),
        _ => None,
    }
}

/// Broker-side settlement of one delivery. Implemented by the lapin channel;
/// tests record the calls instead.
#[async_trait]
pub trait Settle: Send + Sync {
    fn manual_ack(&self) -> bool;

    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error>;

    async fn requeue(&self, delivery_tag: u64) -> Result<(), Error>;

    async fn reject(&self, delivery_tag: u64) -> Result<(), Error>;
}

#[async_trait]
impl Settle for WorkerChannel {
    fn manual_ack(&self) -> bool {
        WorkerChannel::manual_ack(self)
    }

    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        WorkerChannel::acknowledge(self, delivery_tag).await
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), Error> {
        WorkerChannel::requeue(self, delivery_tag).await
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), Error> {
        WorkerChannel::reject(self, delivery_tag).await
    }
}

pub async fn run_event_worker(
    consumer_tag: String,
    channel: WorkerChannel,
    mut consumer: Consumer,
    coordinator: DispatchCoordinator,
    max_delivery_attempts: u32,
    shutdown: CancellationToken,
) {
    info!(consumer_tag = %consumer_tag, "Event worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    process_event(
                        &channel,
                        &coordinator,
                        &delivery.data,
                        delivery.properties.headers(),
                        delivery.delivery_tag,
                        max_delivery_attempts,
                    )
                    .await;
                }
                Some(Err(e)) => {
                    error!(consumer_tag = %consumer_tag, error = %e, "Consumer error");
                }
                None => {
                    consumer_closed(&consumer_tag, &shutdown);
                    break;
                }
            }
        }
    }

    info!(consumer_tag = %consumer_tag, "Event worker stopped");
}

/// A worker without a consumer is useless; stop the service so it gets
/// restarted with fresh channels.
fn consumer_closed(consumer_tag: &str, shutdown: &CancellationToken) {
    if !shutdown.is_cancelled() {
        error!(consumer_tag, "Consumer stream closed, shutting down");
        shutdown.cancel();
    }
}

/// Handles one delivery and settles it with the broker. Returns the decision,
/// which is only applied when the channel is in manual-ack mode.
pub async fn process_event<S: Settle + ?Sized>(
    channel: &S,
    coordinator: &DispatchCoordinator,
    payload: &[u8],
    headers: &Option<FieldTable>,
    delivery_tag: u64,
    max_delivery_attempts: u32,
) -> Disposition {
    let previous_deliveries = delivery_count(headers);

    let disposition = match DeliveryEvent::from_slice(payload) {
        Ok(event) => {
            debug!(
                delivery_id = event.delivery_id,
                event_type = %event.event_type,
                previous_deliveries,
                "Event received"
            );

            let result = coordinator.handle(&event).await;

            match &result {
                Ok(DispatchOutcome::NoRecipient { reason }) => {
                    info!(delivery_id = event.delivery_id, reason = %reason, "Event consumed without recipient");
                }
                Ok(DispatchOutcome::Dispatched { .. }) => {}
                Err(e) => {
                    warn!(
                        delivery_id = event.delivery_id,
                        previous_deliveries,
                        max_delivery_attempts,
                        error = %e,
                        "Event processing failed"
                    );
                }
            }

            disposition(&result, previous_deliveries, max_delivery_attempts)
        }
        Err(e) => {
            error!(error = %e, "Undecodable event payload");
            Disposition::DeadLetter
        }
    };

    if !channel.manual_ack() {
        return disposition;
    }

    let settled = match disposition {
        Disposition::Ack => channel.acknowledge(delivery_tag).await,
        Disposition::Requeue => channel.requeue(delivery_tag).await,
        Disposition::DeadLetter => {
            warn!(delivery_tag, "Rejecting event to dead-letter queue");
            channel.reject(delivery_tag).await
        }
    };

    if let Err(e) = settled {
        error!(delivery_tag, error = %e, "Failed to settle event");
    }

    disposition
}

pub async fn run_dead_letter_worker(
    consumer_tag: String,
    channel: WorkerChannel,
    mut consumer: Consumer,
    handler: DeadLetterHandler,
    shutdown: CancellationToken,
) {
    info!(consumer_tag = %consumer_tag, "Dead-letter worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    process_dead_letter(
                        &channel,
                        &handler,
                        &delivery.data,
                        delivery.properties.headers(),
                        delivery.delivery_tag,
                    )
                    .await;
                }
                Some(Err(e)) => {
                    error!(consumer_tag = %consumer_tag, error = %e, "Consumer error");
                }
                None => {
                    consumer_closed(&consumer_tag, &shutdown);
                    break;
                }
            }
        }
    }

    info!(consumer_tag = %consumer_tag, "Dead-letter worker stopped");
}

/// Archives and always acknowledges.
pub async fn process_dead_letter<S: Settle + ?Sized>(
    channel: &S,
    handler: &DeadLetterHandler,
    payload: &[u8],
    headers: &Option<FieldTable>,
    delivery_tag: u64,
) {
    let reason = death_reason(headers);
    handler.handle(payload, reason.as_deref()).await;

    if let Err(e) = channel.acknowledge(delivery_tag).await {
        error!(error = %e, "Failed to acknowledge dead letter");
    }
}
