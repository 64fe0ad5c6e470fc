//! Aggregated health report.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::ResultCache;
use crate::resilience::{CircuitBreakerManager, CircuitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>, latency: Duration, critical: bool) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: latency.as_millis() as u64,
            critical,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, latency: Duration, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: latency.as_millis() as u64,
            critical: false,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(
        name: impl Into<String>,
        latency: Duration,
        critical: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: latency.as_millis() as u64,
            critical,
            message: Some(message.into()),
        }
    }
}

/// Combined report over every component.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub total_latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

impl AggregatedHealth {
    /// Any critical component unhealthy → Unhealthy; any component not
    /// healthy → Degraded; otherwise Healthy.
    pub fn from_components(components: Vec<ComponentHealth>, total_latency: Duration) -> Self {
        let critical_down = components
            .iter()
            .any(|c| c.critical && c.status == HealthStatus::Unhealthy);
        let any_impaired = components.iter().any(|c| c.status != HealthStatus::Healthy);

        let status = if critical_down {
            HealthStatus::Unhealthy
        } else if any_impaired {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            components,
            total_latency_ms: total_latency.as_millis() as u64,
            checked_at: Utc::now(),
        }
    }

    /// Whether the process can take traffic.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Probe both subsystems and fold in every open circuit.
pub async fn check(breakers: &CircuitBreakerManager, cache: &ResultCache) -> AggregatedHealth {
    let started = Instant::now();
    let mut components = Vec::new();

    if breakers.is_shared() {
        let probe_started = Instant::now();
        let reachable = breakers.health_check().await;
        components.push(store_component("circuit_breaker_store", reachable, probe_started.elapsed()));
    }

    let probe_started = Instant::now();
    let reachable = cache.health_check().await;
    components.push(store_component("cache_store", reachable, probe_started.elapsed()));

    let mut states: Vec<(String, CircuitState)> = breakers.get_all_states().into_iter().collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    for (service, state) in states {
        if state == CircuitState::Open {
            components.push(ComponentHealth::degraded(
                format!("circuit:{service}"),
                Duration::ZERO,
                "circuit open, calls are short-circuited",
            ));
        }
    }

    AggregatedHealth::from_components(components, started.elapsed())
}

fn store_component(name: &str, reachable: bool, latency: Duration) -> ComponentHealth {
    if reachable {
        ComponentHealth::healthy(name, latency, false)
    } else {
        ComponentHealth::unhealthy(name, latency, false, "shared store unreachable, running on local state")
    }
}
