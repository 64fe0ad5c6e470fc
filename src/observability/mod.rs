//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! breaker manager, result cache, store link
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON in production)
//!     → Metrics endpoint (Prometheus scrape, `watch` command)
//! ```
//!
//! # Design Decisions
//! - Structured logging with service name as a field on every breaker event
//! - Store degradation is logged once per occurrence, not per call
//! - Metrics are cheap (atomic increments) and safe without an exporter

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingError};
