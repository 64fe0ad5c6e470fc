//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gateway_guard::clock::ManualClock;
use gateway_guard::config::{BreakerConfig, ServiceConfig, StoreConfig};
use gateway_guard::{CircuitBreakerManager, MemoryStore};

/// `discovery`: 3 failures open the circuit, 3 s until a probe.
pub fn discovery_config() -> BreakerConfig {
    BreakerConfig::default().with_service("discovery", ServiceConfig::new(3, 3, 0.5))
}

/// Manager with per-process state only.
pub fn local_manager(config: BreakerConfig, clock: Arc<ManualClock>) -> CircuitBreakerManager {
    CircuitBreakerManager::builder(config)
        .clock(clock)
        .build()
        .unwrap()
}

/// Manager persisting to `store`, as a separate gateway instance would.
pub fn shared_manager(
    config: BreakerConfig,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
) -> CircuitBreakerManager {
    CircuitBreakerManager::builder(config)
        .store(store, &StoreConfig::memory())
        .clock(clock)
        .build()
        .unwrap()
}

/// Counts how many times the guarded operation actually ran.
#[derive(Debug, Clone, Default)]
pub struct Invocations(Arc<AtomicU32>);

impl Invocations {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A guarded call that fails with "unavailable".
pub async fn failing_call(
    manager: &CircuitBreakerManager,
    service: &str,
    invocations: &Invocations,
) -> Result<(), gateway_guard::CallError<&'static str>> {
    manager
        .call(service, || async {
            invocations.hit();
            Err("unavailable")
        })
        .await
}

/// A guarded call that succeeds with 42.
pub async fn succeeding_call(
    manager: &CircuitBreakerManager,
    service: &str,
    invocations: &Invocations,
) -> Result<u32, gateway_guard::CallError<&'static str>> {
    manager
        .call(service, || async {
            invocations.hit();
            Ok(42)
        })
        .await
}
