//! Result cache subsystem.
//!
//! # Data Flow
//! ```text
//! Caller with a logical key (query, text, filters):
//!     → keys.rs (canonical JSON → SHA-256 → "{prefix}:{hex}")
//!     → result_cache.rs (store get through the link)
//!     → hit: decoded value
//!     → miss: caller computes, then result_cache.rs stores it with the category TTL
//!
//! Every lookup:
//!     → stats.rs (hit/miss counters)
//! ```
//!
//! # Design Decisions
//! - Cache-aside: the cache never originates data
//! - Store trouble lowers the hit rate, never the caller's latency or correctness
//! - Category invalidation relies on the `prefix:` separator in every key

pub mod keys;
pub mod result_cache;
pub mod stats;

pub use keys::{derive_key, CacheCategory};
pub use result_cache::ResultCache;
pub use stats::CacheStats;
