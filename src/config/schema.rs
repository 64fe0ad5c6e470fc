//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Shared state store connection settings.
    pub store: StoreConfig,

    /// Circuit breaker thresholds, global and per service.
    pub circuit_breaker: BreakerConfig,

    /// Result cache TTLs per category.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Shared state store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// When false, both subsystems run on process-local state only.
    pub enabled: bool,

    /// Store URL (`redis://`, `rediss://` or `memory://`).
    pub url: String,

    /// Number of multiplexed connections kept open.
    pub pool_size: usize,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Per-command deadline in milliseconds.
    pub op_timeout_ms: u64,

    /// Deadline for a whole prefix delete, in milliseconds.
    pub bulk_timeout_ms: u64,

    /// Base delay before retrying a degraded store, in milliseconds.
    pub reconnect_base_ms: u64,

    /// Upper bound for the retry delay, in milliseconds.
    pub reconnect_max_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 4,
            connect_timeout_ms: 500,
            op_timeout_ms: 100,
            bulk_timeout_ms: 30_000,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl StoreConfig {
    /// A config selecting the in-process store.
    pub fn memory() -> Self {
        Self {
            url: "memory://".to_string(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }

    /// True when the URL selects the in-process store.
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory:")
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// TTL of persisted circuit records, refreshed on every write.
    pub state_ttl_secs: u64,

    /// Settings used for any service without its own entry.
    pub defaults: ServiceConfig,

    /// Per-service overrides keyed by service name.
    pub services: HashMap<String, ServiceConfig>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: 3600,
            defaults: ServiceConfig::default(),
            services: HashMap::new(),
        }
    }
}

impl BreakerConfig {
    /// Add or replace the settings for one service.
    pub fn with_service(mut self, name: impl Into<String>, config: ServiceConfig) -> Self {
        self.services.insert(name.into(), config);
        self
    }

    /// Settings that apply to `service`.
    pub fn service(&self, service: &str) -> &ServiceConfig {
        self.services.get(service).unwrap_or(&self.defaults)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }
}

/// Thresholds for a single guarded service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a probe.
    pub timeout_seconds: u64,

    /// Error rate over the outcome window that opens the circuit.
    pub error_rate_threshold: f64,

    /// Number of recent outcomes tracked for the error rate.
    pub window_size: usize,

    /// Outcomes required in the window before the error rate applies.
    pub minimum_calls: usize,

    /// Optional deadline for the wrapped operation, in milliseconds.
    pub call_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 30,
            error_rate_threshold: 0.5,
            window_size: 20,
            minimum_calls: 10,
            call_timeout_ms: None,
        }
    }
}

impl ServiceConfig {
    /// Shorthand for the three thresholds every service must define.
    pub fn new(failure_threshold: u32, timeout_seconds: u64, error_rate_threshold: f64) -> Self {
        Self {
            failure_threshold,
            timeout_seconds,
            error_rate_threshold,
            ..Self::default()
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Result cache TTLs, one per category.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Search results.
    pub search_ttl_secs: u64,

    /// Parsed intents.
    pub intent_ttl_secs: u64,

    /// Embedding vectors.
    pub embedding_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: 1800,
            intent_ttl_secs: 600,
            embedding_ttl_secs: 3600,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or an env-filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint for `watch`.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Seconds between state monitor ticks.
    pub monitor_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            monitor_interval_secs: 10,
        }
    }
}
