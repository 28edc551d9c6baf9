use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            circuit_breaker: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            circuit_breaker: None,
            error: Some(error),
        }
    }

    pub fn degraded(circuit_state: &str, detail: Option<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            response_time_ms: None,
            circuit_breaker: Some(circuit_state.to_string()),
            error: detail,
        }
    }

    pub fn with_circuit_breaker(mut self, state: &str) -> Self {
        self.circuit_breaker = Some(state.to_string());
        self
    }
}

/// Critical dependencies make the service unhealthy; anything else only degrades it.
pub fn overall_status(checks: &BTreeMap<String, ServiceHealth>, critical: &[&str]) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| critical.contains(&name.as_str()))
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let has_problem = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if has_problem {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
