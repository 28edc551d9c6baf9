use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{rbmq::RabbitMqClient, redis::RedisClient},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, ServiceHealth, overall_status},
    },
    store::NotificationStore,
};

const CRITICAL: [&str; 2] = ["database", "message_broker"];

/// Reports on the long-lived clients the service was started with. Missing
/// clients are simply left out of the report.
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn NotificationStore>,
    redis: Option<RedisClient>,
    rabbitmq: Option<Arc<RabbitMqClient>>,
    breakers: Vec<String>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            redis: None,
            rabbitmq: None,
            breakers: Vec::new(),
        }
    }

    pub fn with_redis(mut self, redis: RedisClient, breakers: &[&str]) -> Self {
        self.redis = Some(redis);
        self.breakers = breakers.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_rabbitmq(mut self, rabbitmq: Arc<RabbitMqClient>) -> Self {
        self.rabbitmq = Some(rabbitmq);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        checks.insert("database".to_string(), self.check_database().await);

        if let Some(rabbitmq) = &self.rabbitmq {
            checks.insert("message_broker".to_string(), check_rabbitmq(rabbitmq));
        }

        if let Some(redis) = &self.redis {
            checks.insert("cache_service".to_string(), check_redis(redis).await);

            for name in &self.breakers {
                checks.insert(name.clone(), check_circuit_breaker(redis, name).await);
            }
        }

        HealthCheckResponse {
            status: overall_status(&checks, &CRITICAL),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Database health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }
}

fn check_rabbitmq(rabbitmq: &RabbitMqClient) -> ServiceHealth {
    if rabbitmq.is_connected() {
        ServiceHealth::healthy(0)
    } else {
        warn!("RabbitMQ connection is down");
        ServiceHealth::unhealthy("Connection lost".to_string())
    }
}

async fn check_redis(redis: &RedisClient) -> ServiceHealth {
    let start = Instant::now();

    match redis.ping().await {
        Ok(()) => {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(response_time_ms = elapsed, "Redis health check passed");
            ServiceHealth::healthy(elapsed)
        }
        Err(e) => {
            warn!(error = %e, "Redis ping failed");
            ServiceHealth::unhealthy(format!("Ping failed: {}", e))
        }
    }
}

async fn check_circuit_breaker(redis: &RedisClient, service_name: &str) -> ServiceHealth {
    match redis.circuit_state(service_name).await {
        Ok(state) => {
            debug!(
                service = service_name,
                circuit_state = state.as_str(),
                "Circuit breaker state checked"
            );

            match state {
                CircuitState::Closed => ServiceHealth::healthy(0).with_circuit_breaker(state.as_str()),
                CircuitState::HalfOpen => ServiceHealth::degraded(
                    state.as_str(),
                    Some("Circuit breaker in recovery mode".to_string()),
                ),
                CircuitState::Open => ServiceHealth::degraded(
                    state.as_str(),
                    Some("Circuit breaker open, requests are failing fast".to_string()),
                ),
            }
        }
        Err(e) => {
            warn!(service = service_name, error = %e, "Failed to check circuit breaker state");
            ServiceHealth::unhealthy(format!("Cannot check circuit breaker: {}", e))
        }
    }
}
