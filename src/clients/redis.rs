use anyhow::{Error, Result, anyhow};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

use crate::{
    clients::circuit_breaker::{CircuitBreaker, read_state},
    config::Config,
    models::circuit_breaker::CircuitState,
};

/// Shared Redis connection backing the circuit breakers.
#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
    config: Config,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            config: config.clone(),
        })
    }

    pub fn circuit_breaker(&self, service_name: &str) -> CircuitBreaker {
        CircuitBreaker::new(
            service_name,
            self.connection.clone(),
            self.config.circuit_breaker_config(),
        )
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let _: String = self.connection.clone().ping().await?;
        Ok(())
    }

    pub async fn circuit_state(&self, service_name: &str) -> Result<CircuitState, Error> {
        read_state(&mut self.connection.clone(), service_name).await
    }
}
