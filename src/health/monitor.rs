//! Periodic circuit state monitor.
//!
//! # Responsibilities
//! - Refresh every known circuit from the shared store on a fixed tick
//! - Publish state gauges and the cache hit rate
//! - Log circuits that are not closed

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::cache::ResultCache;
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerManager, CircuitState};

pub struct StateMonitor {
    breakers: CircuitBreakerManager,
    cache: Option<Arc<ResultCache>>,
    interval: Duration,
}

impl StateMonitor {
    pub fn new(breakers: CircuitBreakerManager, interval: Duration) -> Self {
        Self {
            breakers,
            cache: None,
            interval,
        }
    }

    /// Also publish the hit rate of `cache` on every tick.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "State monitor starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("State monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One refresh-and-publish pass.
    pub async fn tick(&self) {
        self.breakers.refresh_all().await;

        for (service, state) in self.breakers.get_all_states() {
            metrics::record_circuit_state(&service, state);
            if state != CircuitState::Closed {
                tracing::warn!(service = %service, state = %state, "Circuit not closed");
            }
        }

        if let Some(cache) = &self.cache {
            metrics::record_cache_hit_rate(cache.stats().hit_rate());
        }
        if self.breakers.is_degraded() {
            tracing::debug!("Circuit breaker still on local state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, ServiceConfig};

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let breakers = CircuitBreakerManager::new(BreakerConfig::default()).unwrap();
        let monitor = StateMonitor::new(breakers, Duration::from_millis(10));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();

        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_tick_materializes_configured_services() {
        let config = BreakerConfig::default().with_service("discovery", ServiceConfig::default());
        let breakers = CircuitBreakerManager::new(config).unwrap();
        let monitor = StateMonitor::new(breakers.clone(), Duration::from_secs(10));

        monitor.tick().await;
        assert!(breakers.record("discovery").is_some());
    }
}
