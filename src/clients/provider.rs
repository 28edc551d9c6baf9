use anyhow::{Error, Result, anyhow};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    clients::circuit_breaker::CircuitBreaker, config::ProviderConfig,
    models::provider::ProviderReceipt,
};

pub const EMAIL_PROVIDER: &str = "email_provider";
pub const SMS_PROVIDER: &str = "sms_provider";

/// HTTP client for an outbound message provider. Each call makes exactly one
/// request; retrying failed sends is left to the retry scheduler.
pub struct ProviderClient {
    name: &'static str,
    http_client: Client,
    messages_url: String,
    api_key: String,
    circuit_breaker: Option<CircuitBreaker>,
}

impl ProviderClient {
    pub fn new(name: &'static str, config: &ProviderConfig) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(provider = name, api_url = %config.api_url, "Provider client initialized");

        Ok(Self {
            name,
            http_client,
            messages_url: format!("{}/v1/messages", config.api_url),
            api_key: config.api_key.clone(),
            circuit_breaker: None,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn send<T: Serialize + Sync>(&self, message: &T) -> Result<ProviderReceipt, Error> {
        debug!(provider = self.name, "Submitting message to provider");

        match &self.circuit_breaker {
            Some(breaker) => breaker.call(|| self.post_once(message)).await,
            None => self.post_once(message).await,
        }
    }

    async fn post_once<T: Serialize + Sync>(&self, message: &T) -> Result<ProviderReceipt, Error> {
        let response = self
            .http_client
            .post(&self.messages_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(|e| anyhow!("{} request failed: {}", self.name, e))?;

        let status = response.status();

        if status.is_success() {
            let receipt = response.json::<ProviderReceipt>().await.unwrap_or_default();
            debug!(provider = self.name, message_id = ?receipt.id, "Provider accepted message");
            Ok(receipt)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(anyhow!(
                "{} rejected message with status {}: {}",
                self.name,
                status,
                error_text
            ))
        }
    }
}
