use std::{sync::Arc, time::Duration};

use anyhow::Result;
use notification_service::{
    config::ProviderConfig,
    models::status::{Channel, NotificationStatus},
    notifiers::{
        EmailNotifier, NotificationSender, Notifier, NotifierRegistry, SmsNotifier,
        template_params,
    },
    store::{InMemoryNotificationStore, NotificationStore},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use crate::common::{TRACKING_BASE_URL, event, retry_policy, user};

fn provider_config(server: &MockServer, from: &str) -> ProviderConfig {
    ProviderConfig {
        api_url: server.uri(),
        api_key: "test-key".to_string(),
        from: from.to_string(),
        timeout: Duration::from_secs(2),
    }
}

/// Test: Email is posted once with bearer auth and an event-specific subject
#[tokio::test]
async fn test_email_transmit_posts_message() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "from": "noreply@pharmacy.com",
            "to": "ann@example.com",
            "subject": "Your order has been delivered",
            "html": "<p>body</p>"
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "msg-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = EmailNotifier::new(&provider_config(&server, "noreply@pharmacy.com"))?;
    notifier
        .transmit("ann@example.com", "COMPLETED", "<p>body</p>")
        .await?;

    Ok(())
}

/// Test: SMS is posted once with the rendered text as the body
#[tokio::test]
async fn test_sms_transmit_posts_message() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({
            "from": "Pharmacy",
            "to": "+15551234567",
            "body": "Delivery #42: Delivered."
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = SmsNotifier::new(&provider_config(&server, "Pharmacy"))?;
    notifier
        .transmit("+15551234567", "COMPLETED", "Delivery #42: Delivered.")
        .await?;

    Ok(())
}

/// Test: Provider errors surface with the status and are not retried in-call
#[tokio::test]
async fn test_provider_error_is_returned_without_retry() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = EmailNotifier::new(&provider_config(&server, "noreply@pharmacy.com"))?;
    let err = notifier
        .transmit("ann@example.com", "CREATED", "<p>body</p>")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("503"));
    assert!(err.to_string().contains("maintenance"));

    Ok(())
}

/// Test: Channel-specific recipient validation
#[tokio::test]
async fn test_recipient_validation_per_channel() -> Result<()> {
    let server = MockServer::start().await;
    let email = EmailNotifier::new(&provider_config(&server, "noreply@pharmacy.com"))?;
    let sms = SmsNotifier::new(&provider_config(&server, "Pharmacy"))?;

    assert!(email.validate_recipient("ann@example.com").is_ok());
    assert!(email.validate_recipient("").is_err());
    assert!(email.validate_recipient("ann.example.com").is_err());

    assert!(sms.validate_recipient("+1 (555) 123-4567").is_ok());
    assert!(sms.validate_recipient("").is_err());
    assert!(sms.validate_recipient("12").is_err());

    assert!(email.supports(Channel::Email));
    assert!(!email.supports(Channel::Sms));

    Ok(())
}

/// Test: Sending through the real email notifier persists SENT with the body
#[tokio::test]
async fn test_send_persists_sent_notification() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = NotificationSender::new(store.clone(), Duration::from_secs(2));
    let notifier = EmailNotifier::new(&provider_config(&server, "noreply@pharmacy.com"))?;

    let event = event("CREATED", 42, Some(7));
    let params = template_params(&event, &user(7, Some("ann@example.com"), None), TRACKING_BASE_URL);

    let notification = sender
        .send(&notifier, 7, &event, "ann@example.com", &params)
        .await?
        .unwrap();

    assert_eq!(notification.status, NotificationStatus::Sent);
    assert!(notification.sent_at.is_some());
    assert!(
        notification
            .content
            .as_deref()
            .is_some_and(|c| c.contains("http://tracking.pharmacy.com/TN1"))
    );
    assert_eq!(store.get(notification.id).await?, Some(notification.clone()));

    let again = sender
        .send(&notifier, 7, &event, "ann@example.com", &params)
        .await?;
    assert!(again.is_none(), "second send for the same key is a no-op");

    Ok(())
}

/// Test: A rejected send is FAILED, and a later resend delivers the stored body
#[tokio::test]
async fn test_resend_after_provider_recovers() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryNotificationStore::new());
    let sender = NotificationSender::new(store.clone(), Duration::from_secs(2));
    let notifier = SmsNotifier::new(&provider_config(&server, "Pharmacy"))?;

    let event = event("UPDATED", 42, Some(7));
    let params = template_params(&event, &user(7, None, Some("+15551234567")), TRACKING_BASE_URL);

    let failed = sender
        .send(&notifier, 7, &event, "+15551234567", &params)
        .await?
        .unwrap();

    assert_eq!(failed.status, NotificationStatus::Failed);
    assert!(failed.sent_at.is_none());
    assert!(failed.error_message.as_deref().is_some_and(|e| !e.is_empty()));

    let claimed = store
        .claim_for_retry(failed.id, &retry_policy(3).window())
        .await?
        .unwrap();
    let resent = sender.resend(&notifier, claimed).await?;

    assert_eq!(resent.status, NotificationStatus::Sent);
    assert!(resent.sent_at.is_some());
    assert_eq!(resent.retry_count, 1);
    assert_eq!(resent.content, failed.content);

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);

    Ok(())
}

/// Test: The registry hands out notifiers by channel
#[tokio::test]
async fn test_registry_lookup_by_channel() -> Result<()> {
    let server = MockServer::start().await;
    let registry = NotifierRegistry::new().register(Arc::new(EmailNotifier::new(
        &provider_config(&server, "noreply@pharmacy.com"),
    )?));

    assert!(registry.get(Channel::Email).is_some());
    assert!(registry.get(Channel::Sms).is_none());
    assert_eq!(registry.channels(), vec![Channel::Email]);

    Ok(())
}
