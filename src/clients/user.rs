use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    models::{retry::RetryConfig, user::User},
    utils::retry_with_backoff,
};

pub const USER_SERVICE: &str = "user_service";

/// Looks up the contact card for a user id. `Ok(None)` means the user does
/// not exist; `Err` means the lookup itself failed and may succeed later.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>, Error>;
}

pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

enum Lookup {
    Found(User),
    Missing,
}

impl UserServiceClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(config.user_service_timeout())
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(base_url = %config.user_service_url, "User service client initialized");

        Ok(Self {
            http_client,
            base_url: config.user_service_url.trim_end_matches('/').to_string(),
            retry_config: config.lookup_retry_config(),
            circuit_breaker: None,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    async fn fetch_with_retry(
        http_client: Client,
        retry_config: RetryConfig,
        url: String,
    ) -> Result<Lookup, Error> {
        retry_with_backoff(&retry_config, || {
            let url = url.clone();
            let client = http_client.clone();

            async move {
                let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
                let status = response.status();

                if status == StatusCode::NOT_FOUND {
                    return Ok(Lookup::Missing);
                }

                if status.is_success() {
                    let user: User = response
                        .json()
                        .await
                        .map_err(|e| format!("Failed to parse user JSON: {}", e))?;
                    Ok(Lookup::Found(user))
                } else {
                    Err(format!("User service returned status {}", status))
                }
            }
        })
        .await
        .map_err(|e| anyhow!("User lookup failed: {}", e))
    }
}

#[async_trait]
impl RecipientResolver for UserServiceClient {
    async fn find_user(&self, user_id: i64) -> Result<Option<User>, Error> {
        let url = format!("{}/api/users/{}", self.base_url, user_id);

        debug!(user_id, url = %url, "Requesting user from user service");

        let http_client = self.http_client.clone();
        let retry_config = self.retry_config.clone();

        let lookup = match &self.circuit_breaker {
            Some(breaker) => {
                breaker
                    .call(|| Self::fetch_with_retry(http_client, retry_config, url))
                    .await?
            }
            None => Self::fetch_with_retry(http_client, retry_config, url).await?,
        };

        match lookup {
            Lookup::Found(user) => Ok(Some(user)),
            Lookup::Missing => {
                debug!(user_id, "User service has no such user");
                Ok(None)
            }
        }
    }
}
