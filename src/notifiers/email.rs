use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker,
        provider::{EMAIL_PROVIDER, ProviderClient},
    },
    config::ProviderConfig,
    models::{provider::EmailMessage, status::Channel, validation::validate_email},
    notifiers::{
        Notifier,
        template::{EMAIL_BODY, TemplateParams, email_subject, render_html},
    },
};

pub struct EmailNotifier {
    client: ProviderClient,
    from: String,
}

impl EmailNotifier {
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        Ok(Self {
            client: ProviderClient::new(EMAIL_PROVIDER, config)?,
            from: config.from.clone(),
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.client = self.client.with_circuit_breaker(circuit_breaker);
        self
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn validate_recipient(&self, recipient: &str) -> Result<(), Error> {
        validate_email(recipient)
    }

    fn render(&self, _event_type: &str, params: &TemplateParams) -> Result<String, Error> {
        render_html(EMAIL_BODY, params)
    }

    async fn transmit(&self, recipient: &str, event_type: &str, content: &str) -> Result<(), Error> {
        let message = EmailMessage {
            from: self.from.clone(),
            to: recipient.to_string(),
            subject: email_subject(event_type).to_string(),
            html: content.to_string(),
        };

        let receipt = self.client.send(&message).await?;
        debug!(to = %recipient, message_id = ?receipt.id, "Email accepted by provider");

        Ok(())
    }
}
