use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

/// Breaker whose state lives in Redis, so every instance of the service sees
/// the same open/closed view of a dependency.
#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    connection: MultiplexedConnection,
    config: CircuitBreakerConfig,
}

pub fn state_key(service_name: &str) -> String {
    format!("circuit:{}:state", service_name)
}

pub async fn read_state(
    connection: &mut MultiplexedConnection,
    service_name: &str,
) -> Result<CircuitState, Error> {
    let value: Option<String> = connection.get(state_key(service_name)).await?;
    Ok(CircuitState::parse(value.as_deref()))
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        connection: MultiplexedConnection,
        config: CircuitBreakerConfig,
    ) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            connection,
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match self.state().await? {
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.set_state(CircuitState::HalfOpen).await?;
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(anyhow!("Circuit breaker is open for {}", self.service_name))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    async fn try_operation<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match operation().await {
            Ok(result) => {
                if let Err(e) = self.record_success().await {
                    warn!(service = %self.service_name, error = %e, "Failed to record breaker success");
                }
                Ok(result)
            }
            Err(e) => {
                if let Err(record_err) = self.record_failure().await {
                    warn!(service = %self.service_name, error = %record_err, "Failed to record breaker failure");
                }
                Err(e)
            }
        }
    }

    async fn record_success(&self) -> Result<(), Error> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes = self.increment("successes", None).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.set_state(CircuitState::Closed).await?;
                    self.reset_counters().await?;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                self.connection
                    .clone()
                    .del::<_, ()>(self.key("failures"))
                    .await?;
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    async fn record_failure(&self) -> Result<(), Error> {
        if self.state().await? == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .increment("failures", Some(self.config.timeout_seconds))
            .await?;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    fn key(&self, suffix: &str) -> String {
        format!("circuit:{}:{}", self.service_name, suffix)
    }

    pub async fn state(&self) -> Result<CircuitState, Error> {
        read_state(&mut self.connection.clone(), &self.service_name).await
    }

    async fn set_state(&self, state: CircuitState) -> Result<(), Error> {
        self.connection
            .clone()
            .set::<_, _, ()>(state_key(&self.service_name), state.as_str())
            .await?;
        Ok(())
    }

    async fn open(&self) -> Result<(), Error> {
        self.set_state(CircuitState::Open).await?;
        self.connection
            .clone()
            .set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn increment(&self, counter: &str, ttl_seconds: Option<u64>) -> Result<u32, Error> {
        let mut connection = self.connection.clone();
        let key = self.key(counter);
        let count: u32 = connection.incr(&key, 1).await?;

        if let Some(ttl) = ttl_seconds {
            connection.expire::<_, ()>(&key, ttl as i64).await?;
        }

        Ok(count)
    }

    async fn reset_counters(&self) -> Result<(), Error> {
        let mut connection = self.connection.clone();

        for suffix in ["failures", "successes", "opened_at"] {
            connection.del::<_, ()>(self.key(suffix)).await?;
        }

        Ok(())
    }

    async fn should_attempt_reset(&self) -> Result<bool, Error> {
        let opened_at: Option<i64> = self.connection.clone().get(self.key("opened_at")).await?;

        Ok(opened_at
            .map(|opened_at| Utc::now().timestamp() - opened_at >= self.config.timeout_seconds as i64)
            .unwrap_or(true))
    }
}
