use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker,
        provider::{ProviderClient, SMS_PROVIDER},
    },
    config::ProviderConfig,
    models::{provider::SmsMessage, status::Channel, validation::validate_phone_number},
    notifiers::{
        Notifier,
        template::{SMS_BODY, TemplateParams, render},
    },
};

pub struct SmsNotifier {
    client: ProviderClient,
    from: String,
}

impl SmsNotifier {
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        Ok(Self {
            client: ProviderClient::new(SMS_PROVIDER, config)?,
            from: config.from.clone(),
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.client = self.client.with_circuit_breaker(circuit_breaker);
        self
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn validate_recipient(&self, recipient: &str) -> Result<(), Error> {
        validate_phone_number(recipient)
    }

    fn render(&self, _event_type: &str, params: &TemplateParams) -> Result<String, Error> {
        render(SMS_BODY, params)
    }

    async fn transmit(&self, recipient: &str, _event_type: &str, content: &str) -> Result<(), Error> {
        let message = SmsMessage {
            from: self.from.clone(),
            to: recipient.to_string(),
            body: content.to_string(),
        };

        let receipt = self.client.send(&message).await?;
        debug!(to = %recipient, message_id = ?receipt.id, "SMS accepted by gateway");

        Ok(())
    }
}
