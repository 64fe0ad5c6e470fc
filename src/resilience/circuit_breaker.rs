//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast with `CircuitOpen`
//! - Half-Open: one probe call tests whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold, or window error rate >= threshold
//! Open → Half-Open: first call after timeout_seconds since opened_at
//! Half-Open → Closed: probe succeeds (counters reset)
//! Half-Open → Open: probe fails (opened_at reset)
//! ```
//!
//! # Coordination
//! - Each service's slot is mutated inside its DashMap entry, never across an await
//! - Every mutation is written to `circuit_breaker:{service}:state` with a TTL
//! - Each call starts with a read-through; a strictly newer remote record wins
//! - Probes are single-flight per process (slot flag) and across processes
//!   (`SET NX` probe lock holding this instance's id, TTL = `timeout_seconds`)
//! - Store failures degrade to local state; they never reach the caller

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::timeout;

use crate::clock::{self, Clock};
use crate::config::validation::validate_breaker;
use crate::config::{BreakerConfig, ConfigError, StoreConfig};
use crate::observability::metrics;
use crate::resilience::record::{probe_key, state_key, CircuitRecord, CircuitState};
use crate::resilience::window::OutcomeWindow;
use crate::store::{self, StateStore, StoreLink};

/// Error returned by [`CircuitBreakerManager::call`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("circuit open for service '{service}'")]
    CircuitOpen { service: String },

    /// The operation exceeded the service's call timeout and was dropped.
    #[error("call to '{service}' timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    /// The operation's own error.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The operation's error, if the operation ran and failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
enum Decision {
    Run {
        admission: Admission,
        transitioned: Option<CircuitRecord>,
    },
    Reject,
}

#[derive(Debug)]
struct Slot {
    record: CircuitRecord,
    window: OutcomeWindow,
    probe_in_flight: bool,
}

impl Slot {
    fn new(window_size: usize) -> Self {
        Self {
            record: CircuitRecord::default(),
            window: OutcomeWindow::new(window_size),
            probe_in_flight: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: BreakerConfig,
    slots: DashMap<String, Slot>,
    link: Option<StoreLink>,
    clock: Arc<dyn Clock>,
    instance_id: String,
}

/// Builder for [`CircuitBreakerManager`].
#[derive(Debug)]
pub struct CircuitBreakerBuilder {
    config: BreakerConfig,
    store: Option<(Arc<dyn StateStore>, StoreConfig)>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerBuilder {
    /// Persist state to `store`, using `store_config` for deadlines and backoff.
    pub fn store(mut self, store: Arc<dyn StateStore>, store_config: &StoreConfig) -> Self {
        self.store = Some((store, store_config.clone()));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the manager.
    pub fn build(self) -> Result<CircuitBreakerManager, ConfigError> {
        validate_breaker(&self.config).map_err(ConfigError::Validation)?;

        let link = self
            .store
            .map(|(store, config)| StoreLink::new(store, "circuit_breaker", &config));

        Ok(CircuitBreakerManager {
            inner: Arc::new(Inner {
                config: self.config,
                slots: DashMap::new(),
                link,
                clock: self.clock,
                instance_id: uuid::Uuid::new_v4().to_string(),
            }),
        })
    }
}

/// Per-service circuit breakers sharing state through an optional store.
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    inner: Arc<Inner>,
}

impl CircuitBreakerManager {
    pub fn builder(config: BreakerConfig) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            config,
            store: None,
            clock: clock::system(),
        }
    }

    /// Local-only manager: per-process state, no store.
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// Manager persisting to an existing store handle.
    pub fn with_store(
        config: BreakerConfig,
        store: Arc<dyn StateStore>,
        store_config: &StoreConfig,
    ) -> Result<Self, ConfigError> {
        Self::builder(config).store(store, store_config).build()
    }

    /// Manager for the store described by `store_config`.
    ///
    /// An unreachable store does not fail construction: the manager starts in
    /// degraded mode and reconnects lazily on later calls.
    pub async fn connect(
        config: BreakerConfig,
        store_config: &StoreConfig,
    ) -> Result<Self, ConfigError> {
        let builder = Self::builder(config);
        let builder = match store::from_config(store_config) {
            Ok(Some(store)) => builder.store(store, store_config),
            Ok(None) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot build shared store, breaker runs local-only");
                builder
            }
        };

        let manager = builder.build()?;
        if let Some(link) = &manager.inner.link {
            if link.probe().await {
                tracing::info!(backend = link.store().backend(), "Circuit breaker connected to shared store");
            }
        }
        Ok(manager)
    }

    /// Run `operation` under the breaker for `service`.
    pub async fn call<T, E, F, Fut>(&self, service: &str, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.inner.refresh(service).await;

        let (admission, transitioned) = match self.inner.admit(service) {
            Decision::Run {
                admission,
                transitioned,
            } => (admission, transitioned),
            Decision::Reject => return Err(self.reject(service)),
        };

        let mut guard = OutcomeGuard {
            inner: self.inner.clone(),
            service: service.to_string(),
            admission,
            phase: Phase::Admitted,
        };

        if admission == Admission::Probe && !self.inner.claim_probe(service).await {
            guard.abandon();
            return Err(self.reject(service));
        }
        if let Some(record) = transitioned {
            self.inner.persist(service, &record).await;
        }

        let call_timeout = self.inner.config.service(service).call_timeout();
        guard.phase = Phase::Running;
        let outcome = match call_timeout {
            Some(limit) => timeout(limit, operation()).await.map_err(|_| limit),
            None => Ok(operation().await),
        };

        match outcome {
            Ok(Ok(value)) => {
                metrics::record_call(service, "success");
                guard.settle(true).await;
                Ok(value)
            }
            Ok(Err(e)) => {
                metrics::record_call(service, "failure");
                guard.settle(false).await;
                Err(CallError::Operation(e))
            }
            Err(after) => {
                tracing::warn!(service = %service, timeout = ?after, "Guarded call timed out");
                metrics::record_call(service, "timeout");
                guard.settle(false).await;
                Err(CallError::Timeout {
                    service: service.to_string(),
                    after,
                })
            }
        }
    }

    fn reject<E>(&self, service: &str) -> CallError<E> {
        tracing::debug!(service = %service, "Circuit open, rejecting call");
        metrics::record_rejection(service);
        CallError::CircuitOpen {
            service: service.to_string(),
        }
    }

    /// Local view of a service's state; Closed for services never called.
    pub fn get_state(&self, service: &str) -> CircuitState {
        self.inner
            .slots
            .get(service)
            .map(|slot| slot.record.state)
            .unwrap_or_default()
    }

    /// States of every configured service and every service seen so far.
    pub fn get_all_states(&self) -> HashMap<String, CircuitState> {
        let mut states: HashMap<String, CircuitState> = self
            .inner
            .config
            .services
            .keys()
            .map(|name| (name.clone(), CircuitState::Closed))
            .collect();
        for slot in self.inner.slots.iter() {
            states.insert(slot.key().clone(), slot.record.state);
        }
        states
    }

    /// Full local record of a service, if it has been called or refreshed.
    pub fn record(&self, service: &str) -> Option<CircuitRecord> {
        self.inner.slots.get(service).map(|slot| slot.record.clone())
    }

    /// Read-through for every known service.
    pub async fn refresh_all(&self) {
        let mut names: Vec<String> = self.inner.config.services.keys().cloned().collect();
        names.extend(self.inner.slots.iter().map(|slot| slot.key().clone()));
        names.sort();
        names.dedup();

        for name in names {
            self.inner.refresh(&name).await;
            // Materialize configured services so they report a record
            drop(self.inner.slot(&name));
        }
    }

    /// Store reachability; always true for a local-only manager.
    pub async fn health_check(&self) -> bool {
        match &self.inner.link {
            Some(link) => link.probe().await,
            None => true,
        }
    }

    /// True while the manager runs on local state because the store is down.
    pub fn is_degraded(&self) -> bool {
        self.inner
            .link
            .as_ref()
            .map(StoreLink::is_degraded)
            .unwrap_or(false)
    }

    /// Whether this manager was built with a shared store.
    pub fn is_shared(&self) -> bool {
        self.inner.link.is_some()
    }
}

impl Inner {
    fn slot(&self, service: &str) -> RefMut<'_, String, Slot> {
        let window_size = self.config.service(service).window_size;
        self.slots
            .entry(service.to_string())
            .or_insert_with(|| Slot::new(window_size))
    }

    fn admit(&self, service: &str) -> Decision {
        let config = self.config.service(service);
        let now = self.clock.now();
        let mut slot = self.slot(service);

        match slot.record.state {
            CircuitState::Closed => Decision::Run {
                admission: Admission::Normal,
                transitioned: None,
            },
            CircuitState::Open => {
                let waited = slot
                    .record
                    .opened_at
                    .map_or(true, |at| clock::elapsed_since(now, at) >= config.open_timeout());
                if !waited {
                    return Decision::Reject;
                }
                slot.record.state = CircuitState::HalfOpen;
                slot.record.updated_at = Some(now);
                slot.probe_in_flight = true;
                log_transition(service, CircuitState::Open, CircuitState::HalfOpen, &slot.record);
                Decision::Run {
                    admission: Admission::Probe,
                    transitioned: Some(slot.record.clone()),
                }
            }
            CircuitState::HalfOpen if slot.probe_in_flight => Decision::Reject,
            CircuitState::HalfOpen => {
                slot.probe_in_flight = true;
                Decision::Run {
                    admission: Admission::Probe,
                    transitioned: None,
                }
            }
        }
    }

    /// Apply a call outcome and return the record to persist.
    fn apply(&self, service: &str, admission: Admission, success: bool) -> CircuitRecord {
        let config = self.config.service(service);
        let now = self.clock.now();
        let mut slot = self.slot(service);
        let before = slot.record.state;

        match (admission, success) {
            (Admission::Probe, true) => {
                slot.probe_in_flight = false;
                if before == CircuitState::HalfOpen {
                    slot.record.state = CircuitState::Closed;
                    slot.record.failure_count = 0;
                    slot.record.success_count = 0;
                    slot.record.opened_at = None;
                    slot.window.clear();
                }
            }
            (Admission::Probe, false) => {
                slot.probe_in_flight = false;
                slot.record.failure_count = slot.record.failure_count.saturating_add(1);
                slot.record.last_failure_time = Some(now);
                if before == CircuitState::HalfOpen {
                    slot.record.state = CircuitState::Open;
                    slot.record.opened_at = Some(now);
                    slot.window.clear();
                }
            }
            (Admission::Normal, true) => {
                if before == CircuitState::Closed {
                    slot.record.failure_count = 0;
                    slot.record.success_count = slot.record.success_count.saturating_add(1);
                    slot.window.push(true);
                }
            }
            (Admission::Normal, false) => {
                slot.record.failure_count = slot.record.failure_count.saturating_add(1);
                slot.record.last_failure_time = Some(now);
                if before == CircuitState::Closed {
                    slot.window.push(false);
                    let tripped = slot.record.failure_count >= config.failure_threshold
                        || slot
                            .window
                            .exceeds(config.error_rate_threshold, config.minimum_calls);
                    if tripped {
                        slot.record.state = CircuitState::Open;
                        slot.record.opened_at = Some(now);
                        slot.window.clear();
                    }
                }
            }
        }

        slot.record.updated_at = Some(now);
        if slot.record.state != before {
            log_transition(service, before, slot.record.state, &slot.record);
        }
        slot.record.clone()
    }

    fn abandon_probe(&self, service: &str) {
        if let Some(mut slot) = self.slots.get_mut(service) {
            slot.probe_in_flight = false;
        }
    }

    /// Adopt the stored record when it is newer than the local one.
    async fn refresh(&self, service: &str) {
        let Some(link) = &self.link else {
            return;
        };
        let key = state_key(service);
        let bytes = match link.run("get", link.store().get(&key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) | Err(_) => return,
        };
        let remote = match CircuitRecord::decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(service = %service, error = %e, "Ignoring undecodable circuit record");
                return;
            }
        };

        let mut slot = self.slot(service);
        if slot.probe_in_flight || !slot.record.is_older_than(&remote) {
            return;
        }
        let before = slot.record.state;
        if remote.state != before {
            tracing::info!(
                service = %service,
                from = %before,
                to = %remote.state,
                "Adopted circuit state from shared store"
            );
            slot.window.clear();
            metrics::record_circuit_state(service, remote.state);
        }
        slot.record = remote;
    }

    async fn persist(&self, service: &str, record: &CircuitRecord) {
        let Some(link) = &self.link else {
            return;
        };
        let bytes = match record.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(service = %service, error = %e, "Cannot encode circuit record");
                return;
            }
        };
        let ttl = self.config.state_ttl();
        // Absorbed: the link logs and degrades on store failure
        let _ = link
            .run("set", link.store().set(&state_key(service), bytes, ttl))
            .await;
    }

    /// Take the cross-instance probe lock. True when this instance may probe.
    async fn claim_probe(&self, service: &str) -> bool {
        let Some(link) = &self.link else {
            return true;
        };
        let key = probe_key(service);
        let ttl = self.config.service(service).open_timeout();
        let owner = self.instance_id.as_bytes().to_vec();

        match link.run("set_if_absent", link.store().set_if_absent(&key, owner, ttl)).await {
            Ok(true) => true,
            Ok(false) => {
                let held_by_us = matches!(
                    link.run("get", link.store().get(&key)).await,
                    Ok(Some(holder)) if holder == self.instance_id.as_bytes()
                );
                if !held_by_us {
                    tracing::debug!(service = %service, "Probe already in flight on another instance");
                }
                held_by_us
            }
            // Store down: the slot flag alone keeps probes single per process
            Err(_) => true,
        }
    }

    async fn release_probe(&self, service: &str) {
        let Some(link) = &self.link else {
            return;
        };
        let key = probe_key(service);
        if let Ok(Some(holder)) = link.run("get", link.store().get(&key)).await {
            if holder == self.instance_id.as_bytes() {
                let _ = link.run("delete", link.store().delete(&key)).await;
            }
        }
    }
}

fn log_transition(service: &str, from: CircuitState, to: CircuitState, record: &CircuitRecord) {
    tracing::info!(
        service = %service,
        from = %from,
        to = %to,
        failure_count = record.failure_count,
        "Circuit state transition"
    );
    metrics::record_transition(service, from, to);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Admitted, operation not started yet.
    Admitted,
    Running,
    Settled,
}

/// Records the call's outcome exactly once, including when the call is dropped.
///
/// Dropping before the operation starts gives the slot back without an outcome.
struct OutcomeGuard {
    inner: Arc<Inner>,
    service: String,
    admission: Admission,
    phase: Phase,
}

impl OutcomeGuard {
    async fn settle(mut self, success: bool) {
        self.phase = Phase::Settled;
        let record = self.inner.apply(&self.service, self.admission, success);
        self.inner.persist(&self.service, &record).await;
        if self.admission == Admission::Probe {
            self.inner.release_probe(&self.service).await;
        }
    }

    /// Give up a probe that never ran.
    fn abandon(&mut self) {
        self.phase = Phase::Settled;
        self.inner.abandon_probe(&self.service);
    }

    fn spawn_release(&mut self, record: Option<CircuitRecord>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = self.inner.clone();
        let service = std::mem::take(&mut self.service);
        let probe = self.admission == Admission::Probe;
        handle.spawn(async move {
            if let Some(record) = record {
                inner.persist(&service, &record).await;
            }
            if probe {
                inner.release_probe(&service).await;
            }
        });
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        match self.phase {
            Phase::Settled => return,
            Phase::Admitted => {
                tracing::debug!(service = %self.service, "Call dropped before it started");
                if self.admission == Admission::Probe {
                    self.inner.abandon_probe(&self.service);
                    // The lock may have been taken just before the drop
                    self.spawn_release(None);
                }
                return;
            }
            Phase::Running => {}
        }
        tracing::debug!(service = %self.service, "Guarded call cancelled, counting as failure");
        metrics::record_call(&self.service, "cancelled");
        let record = self.inner.apply(&self.service, self.admission, false);
        self.spawn_release(Some(record));
    }
}
