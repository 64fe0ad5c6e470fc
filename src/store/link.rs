//! Two-tier access policy in front of a [`StateStore`].
//!
//! # Responsibilities
//! - Bound every store call by a short deadline
//! - Flip to degraded mode on the first unreachable-store error, logging once
//! - While degraded, skip the store until the backoff deadline passes
//! - Clear degraded mode on the first successful call
//!
//! # Design Decisions
//! - Degradation is a flag, not an exception path: callers get `Err` and fall back
//! - Only one caller per backoff window re-tries a dead store
//! - Serialization errors never degrade the link
//! - A bulk sweep that outlives its deadline is slow, not lost: it never degrades the link

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::config::StoreConfig;
use crate::observability::metrics;
use crate::resilience::backoff::reconnect_delay;
use crate::store::{StateStore, StoreError, StoreResult};

/// A store handle plus the degraded-mode state of one subsystem.
#[derive(Debug)]
pub struct StoreLink {
    store: Arc<dyn StateStore>,
    component: &'static str,
    op_timeout: Duration,
    bulk_timeout: Duration,
    reconnect_base_ms: u64,
    reconnect_max_ms: u64,
    degraded: AtomicBool,
    failures: AtomicU32,
    retry_at: Mutex<Option<Instant>>,
}

impl StoreLink {
    /// Wrap `store` for `component` ("circuit_breaker" or "cache").
    pub fn new(store: Arc<dyn StateStore>, component: &'static str, config: &StoreConfig) -> Self {
        Self {
            store,
            component,
            op_timeout: config.op_timeout(),
            bulk_timeout: config.bulk_timeout(),
            reconnect_base_ms: config.reconnect_base_ms,
            reconnect_max_ms: config.reconnect_max_ms,
            degraded: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            retry_at: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// True while running on local state only.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Run one store call under the link's policy.
    ///
    /// The future is not polled at all while the link is backing off.
    pub async fn run<T, Fut>(&self, operation: &'static str, call: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        if !self.should_attempt() {
            return Err(StoreError::Degraded);
        }
        self.settle(operation, timeout(self.op_timeout, call).await)
    }

    /// Run a multi-round-trip store call under the bulk deadline.
    ///
    /// Errors reported by the store still degrade the link. Running past the
    /// deadline only fails this call.
    pub async fn run_bulk<T, Fut>(&self, operation: &'static str, call: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        if !self.should_attempt() {
            return Err(StoreError::Degraded);
        }
        match timeout(self.bulk_timeout, call).await {
            Ok(result) => self.settle(operation, Ok(result)),
            Err(_) => {
                tracing::warn!(
                    component = self.component,
                    operation,
                    deadline = ?self.bulk_timeout,
                    "Bulk store call exceeded its deadline"
                );
                metrics::record_store_error(self.component, operation);
                Err(StoreError::Unavailable(format!(
                    "{operation} timed out after {:?}",
                    self.bulk_timeout
                )))
            }
        }
    }

    /// Ping the store regardless of backoff and update the degraded flag.
    pub async fn probe(&self) -> bool {
        let result = timeout(self.op_timeout, self.store.ping()).await;
        self.settle("ping", result).is_ok()
    }

    fn settle<T>(
        &self,
        operation: &'static str,
        result: Result<StoreResult<T>, tokio::time::error::Elapsed>,
    ) -> StoreResult<T> {
        match result {
            Ok(Ok(value)) => {
                self.mark_healthy();
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.is_unavailable() {
                    self.mark_failed(operation, &e);
                }
                Err(e)
            }
            Err(_) => {
                let e = StoreError::Unavailable(format!(
                    "{operation} timed out after {:?}",
                    self.op_timeout
                ));
                self.mark_failed(operation, &e);
                Err(e)
            }
        }
    }

    fn should_attempt(&self) -> bool {
        if !self.is_degraded() {
            return true;
        }
        let mut retry_at = self.retry_at.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match *retry_at {
            Some(at) if now < at => false,
            _ => {
                // Claim this window; concurrent callers keep skipping
                let attempt = self.failures.load(Ordering::Relaxed);
                *retry_at = Some(now + self.delay(attempt));
                true
            }
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        reconnect_delay(attempt.max(1), self.reconnect_base_ms, self.reconnect_max_ms)
    }

    fn mark_failed(&self, operation: &'static str, error: &StoreError) {
        let attempt = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_store_error(self.component, operation);

        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                component = self.component,
                backend = self.store.backend(),
                operation,
                error = %error,
                "Shared store unreachable, falling back to local state"
            );
            metrics::record_store_degraded(self.component, true);
        } else {
            tracing::debug!(
                component = self.component,
                operation,
                attempt,
                error = %error,
                "Shared store still unreachable"
            );
        }

        let mut retry_at = self.retry_at.lock().unwrap_or_else(PoisonError::into_inner);
        *retry_at = Some(Instant::now() + self.delay(attempt));
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            tracing::info!(
                component = self.component,
                backend = self.store.backend(),
                "Shared store reachable again"
            );
            metrics::record_store_degraded(self.component, false);
        }
        self.failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn link(store: Arc<MemoryStore>, base_ms: u64) -> StoreLink {
        let config = StoreConfig {
            op_timeout_ms: 50,
            reconnect_base_ms: base_ms,
            reconnect_max_ms: base_ms * 4,
            ..StoreConfig::memory()
        };
        StoreLink::new(store, "test", &config)
    }

    #[tokio::test]
    async fn test_failure_degrades_and_skips() {
        let store = Arc::new(MemoryStore::new());
        let link = link(store.clone(), 60_000);

        store.set_available(false);
        let err = link.run("get", link.store().get("k")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(link.is_degraded());

        // Within the backoff window the store is not touched at all
        store.set_available(true);
        let err = link.run("get", link.store().get("k")).await.unwrap_err();
        assert!(matches!(err, StoreError::Degraded));
    }

    #[tokio::test]
    async fn test_recovers_after_backoff() {
        let store = Arc::new(MemoryStore::new());
        let link = link(store.clone(), 1);

        store.set_available(false);
        assert!(link.run("get", link.store().get("k")).await.is_err());
        store.set_available(true);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(link.run("get", link.store().get("k")).await.unwrap(), None);
        assert!(!link.is_degraded());
    }

    #[tokio::test]
    async fn test_probe_ignores_backoff() {
        let store = Arc::new(MemoryStore::new());
        let link = link(store.clone(), 60_000);

        store.set_available(false);
        assert!(!link.probe().await);
        assert!(link.is_degraded());

        store.set_available(true);
        assert!(link.probe().await);
        assert!(!link.is_degraded());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(200)));
        let link = link(store, 60_000);

        let started = Instant::now();
        let err = link.run("get", link.store().get("k")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(link.is_degraded());
    }

    #[tokio::test]
    async fn test_bulk_call_outlives_command_deadline() {
        let store = Arc::new(MemoryStore::new());
        store.set("search:a", vec![1], Duration::from_secs(60)).await.unwrap();
        store.set_latency(Duration::from_millis(120));
        let link = link(store, 60_000);

        let deleted = link
            .run_bulk("delete_matching", link.store().delete_matching("search:"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(!link.is_degraded());
    }

    #[tokio::test]
    async fn test_bulk_deadline_does_not_degrade() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(200)));
        let config = StoreConfig {
            op_timeout_ms: 50,
            bulk_timeout_ms: 80,
            ..StoreConfig::memory()
        };
        let link = StoreLink::new(store, "test", &config);

        let err = link
            .run_bulk("delete_matching", link.store().delete_matching("search:"))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(!link.is_degraded());
    }

    #[tokio::test]
    async fn test_bulk_call_on_dead_store_degrades() {
        let store = Arc::new(MemoryStore::new());
        let link = link(store.clone(), 60_000);

        store.set_available(false);
        assert!(link
            .run_bulk("delete_matching", link.store().delete_matching("search:"))
            .await
            .is_err());
        assert!(link.is_degraded());
    }
}
