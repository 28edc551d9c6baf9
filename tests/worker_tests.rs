use std::sync::Mutex;

use anyhow::{Error, Result};
use async_trait::async_trait;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use notification_service::{
    dead_letter::DeadLetterHandler,
    models::status::{Channel, NotificationStatus},
    store::NotificationStore,
    worker::{
        DEATH_REASON_HEADER, DELIVERY_COUNT_HEADER, Disposition, Settle, process_dead_letter,
        process_event,
    },
};
use serde_json::json;

use crate::common::{Harness, user};

const MAX_DELIVERY_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Ack(u64),
    Requeue(u64),
    Reject(u64),
}

/// Records what the worker told the broker.
struct RecordingChannel {
    manual_ack: bool,
    calls: Mutex<Vec<Settled>>,
}

impl RecordingChannel {
    fn new(manual_ack: bool) -> Self {
        Self {
            manual_ack,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Settled> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Settle for RecordingChannel {
    fn manual_ack(&self) -> bool {
        self.manual_ack
    }

    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.calls.lock().unwrap().push(Settled::Ack(delivery_tag));
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), Error> {
        self.calls.lock().unwrap().push(Settled::Requeue(delivery_tag));
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), Error> {
        self.calls.lock().unwrap().push(Settled::Reject(delivery_tag));
        Ok(())
    }
}

fn payload(delivery_id: i64, user_id: i64) -> Vec<u8> {
    json!({
        "eventType": "CREATED",
        "deliveryId": delivery_id,
        "status": "IN_TRANSIT",
        "additionalData": {"userId": user_id, "trackingNumber": "TN1"}
    })
    .to_string()
    .into_bytes()
}

fn earlier_deliveries(count: i64) -> Option<FieldTable> {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(DELIVERY_COUNT_HEADER),
        AMQPValue::LongLongInt(count),
    );
    Some(headers)
}

/// Test: A handled event is acknowledged after its row exists
#[tokio::test]
async fn test_handled_event_is_acked() -> Result<()> {
    let harness = Harness::new();
    harness.resolver.add(user(7, Some("ann@example.com"), None));
    let channel = RecordingChannel::new(true);

    let disposition = process_event(
        &channel,
        &harness.coordinator,
        &payload(42, 7),
        &None,
        1,
        MAX_DELIVERY_ATTEMPTS,
    )
    .await;
    harness.settle().await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(channel.calls(), vec![Settled::Ack(1)]);
    assert_eq!(harness.store.all().await.len(), 1);

    Ok(())
}

/// Test: An event without a resolvable recipient is still acknowledged
#[tokio::test]
async fn test_no_recipient_is_acked() -> Result<()> {
    let harness = Harness::new();
    let channel = RecordingChannel::new(true);

    process_event(
        &channel,
        &harness.coordinator,
        &payload(42, 99),
        &None,
        2,
        MAX_DELIVERY_ATTEMPTS,
    )
    .await;

    assert_eq!(channel.calls(), vec![Settled::Ack(2)]);
    assert!(harness.store.all().await.is_empty());

    Ok(())
}

/// Test: A store failure is not acked; it is requeued while attempts remain
#[tokio::test]
async fn test_store_failure_is_requeued_not_acked() -> Result<()> {
    let harness = Harness::new();
    harness.resolver.add(user(7, Some("ann@example.com"), None));
    harness.store.set_unavailable(true);
    let channel = RecordingChannel::new(true);

    let disposition = process_event(
        &channel,
        &harness.coordinator,
        &payload(42, 7),
        &earlier_deliveries(1),
        3,
        MAX_DELIVERY_ATTEMPTS,
    )
    .await;

    assert_eq!(disposition, Disposition::Requeue);
    assert_eq!(channel.calls(), vec![Settled::Requeue(3)]);

    Ok(())
}

/// Test: The last allowed delivery of a failing event is rejected to the dead-letter queue
#[tokio::test]
async fn test_exhausted_event_is_rejected() -> Result<()> {
    let harness = Harness::new();
    harness.resolver.set_failing(true);
    let channel = RecordingChannel::new(true);

    let disposition = process_event(
        &channel,
        &harness.coordinator,
        &payload(42, 7),
        &earlier_deliveries(3),
        4,
        MAX_DELIVERY_ATTEMPTS,
    )
    .await;

    assert_eq!(disposition, Disposition::DeadLetter);
    assert_eq!(channel.calls(), vec![Settled::Reject(4)]);

    Ok(())
}

/// Test: An undecodable payload is rejected at once without touching the coordinator
#[tokio::test]
async fn test_poison_payload_is_rejected_immediately() -> Result<()> {
    let harness = Harness::new();
    let channel = RecordingChannel::new(true);

    let disposition = process_event(
        &channel,
        &harness.coordinator,
        b"{not json",
        &None,
        5,
        MAX_DELIVERY_ATTEMPTS,
    )
    .await;

    assert_eq!(disposition, Disposition::DeadLetter);
    assert_eq!(channel.calls(), vec![Settled::Reject(5)]);
    assert_eq!(harness.resolver.lookups(), 0);

    Ok(())
}

/// Test: In auto-ack mode nothing is settled explicitly
#[tokio::test]
async fn test_auto_ack_mode_does_not_settle() -> Result<()> {
    let harness = Harness::new();
    harness.resolver.add(user(7, Some("ann@example.com"), None));
    let channel = RecordingChannel::new(false);

    let disposition = process_event(
        &channel,
        &harness.coordinator,
        &payload(42, 7),
        &None,
        6,
        MAX_DELIVERY_ATTEMPTS,
    )
    .await;
    harness.settle().await;

    assert_eq!(disposition, Disposition::Ack);
    assert!(channel.calls().is_empty());
    assert_eq!(harness.rows(Channel::Email).await[0].status, NotificationStatus::Sent);

    Ok(())
}

/// Test: Dead letters are archived with the broker's reason and acknowledged
#[tokio::test]
async fn test_dead_letter_is_archived_and_acked() -> Result<()> {
    let harness = Harness::new();
    let handler = DeadLetterHandler::new(harness.store.clone());
    let channel = RecordingChannel::new(true);

    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(DEATH_REASON_HEADER),
        AMQPValue::LongString(LongString::from("delivery_limit")),
    );

    process_dead_letter(&channel, &handler, &payload(42, 7), &Some(headers), 7).await;

    assert_eq!(channel.calls(), vec![Settled::Ack(7)]);
    let archived = harness.store.list_dead_letters(10).await?;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].reason, "delivery_limit");
    assert_eq!(archived[0].delivery_id, Some(42));

    Ok(())
}
