//! Shared state store subsystem.
//!
//! # Data Flow
//! ```text
//! circuit_breaker.rs / result_cache.rs
//!     → link.rs (deadline per call, degraded flag, reconnect backoff)
//!     → StateStore implementation:
//!         - redis.rs (shared across instances)
//!         - memory.rs (single process, tests)
//! ```
//!
//! # Design Decisions
//! - One flat key namespace; every write carries a TTL
//! - Values are opaque bytes; typed encoding happens at the caller's edge
//! - Store errors are data for the link, never errors for business calls

pub mod link;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::{self, Clock};
use crate::config::StoreConfig;

pub use link::StoreLink;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors produced by a store or at the store's serialization edge.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, command failure, or deadline exceeded.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Call skipped because the link is waiting to retry a failed store.
    #[error("store degraded, call skipped")]
    Degraded,
}

impl StoreError {
    /// True for errors that mean the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A TTL-capable key-value store shared by every gateway instance.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()>;

    /// Store `value` only when `key` is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool>;

    /// Remove `key`, returning the number of keys deleted.
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Remove every key starting with `prefix`.
    async fn delete_matching(&self, prefix: &str) -> StoreResult<u64>;

    /// Round-trip to the store.
    async fn ping(&self) -> StoreResult<()>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Build the store selected by `config.url`.
///
/// Returns `None` when the store is disabled. Never performs network I/O.
pub fn from_config(config: &StoreConfig) -> StoreResult<Option<Arc<dyn StateStore>>> {
    from_config_with_clock(config, clock::system())
}

/// As [`from_config`], with the clock the in-process store expires entries by.
pub fn from_config_with_clock(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> StoreResult<Option<Arc<dyn StateStore>>> {
    if !config.enabled {
        return Ok(None);
    }
    if config.is_memory() {
        return Ok(Some(Arc::new(MemoryStore::with_clock(clock))));
    }
    Ok(Some(Arc::new(RedisStore::new(config)?)))
}
