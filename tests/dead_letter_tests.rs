use std::sync::Arc;

use anyhow::Result;
use notification_service::{
    dead_letter::DeadLetterHandler,
    store::{InMemoryNotificationStore, NotificationStore},
};
use serde_json::json;

/// Test: Dead letters are archived with the broker's reason
#[tokio::test]
async fn test_dead_letter_is_archived() -> Result<()> {
    let store = Arc::new(InMemoryNotificationStore::new());
    let handler = DeadLetterHandler::new(store.clone());

    let payload = json!({
        "eventType": "CREATED",
        "deliveryId": 42,
        "additionalData": {"userId": 7}
    });

    let archived = handler
        .handle(payload.to_string().as_bytes(), Some("delivery_limit"))
        .await
        .unwrap();

    assert_eq!(archived.delivery_id, Some(42));
    assert_eq!(archived.reason, "delivery_limit");
    assert_eq!(archived.payload, payload);

    let listed = store.list_dead_letters(10).await?;
    assert_eq!(listed, vec![archived]);

    Ok(())
}

/// Test: Archive failures are swallowed so the message is still acknowledged
#[tokio::test]
async fn test_archive_failure_is_not_propagated() -> Result<()> {
    let store = Arc::new(InMemoryNotificationStore::new());
    let handler = DeadLetterHandler::new(store.clone());
    store.set_unavailable(true);

    let archived = handler.handle(b"{\"eventType\":\"CREATED\"}", None).await;

    assert!(archived.is_none());

    Ok(())
}

/// Test: Newest dead letters are listed first, up to the limit
#[tokio::test]
async fn test_dead_letters_listed_newest_first() -> Result<()> {
    let store = Arc::new(InMemoryNotificationStore::new());
    let handler = DeadLetterHandler::new(store.clone());

    for delivery_id in 1..=3 {
        let payload = json!({"eventType": "UPDATED", "deliveryId": delivery_id});
        handler.handle(payload.to_string().as_bytes(), None).await;
    }

    let listed = store.list_dead_letters(2).await?;
    let ids: Vec<Option<i64>> = listed.iter().map(|d| d.delivery_id).collect();

    assert_eq!(ids, vec![Some(3), Some(2)]);

    Ok(())
}
