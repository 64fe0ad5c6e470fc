//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! On demand (report.rs):
//!     Probe breaker store, probe cache store, read circuit states
//!     → ComponentHealth per component
//!     → AggregatedHealth (worst status wins, critical components gate readiness)
//!
//! Periodic (monitor.rs):
//!     Ticker
//!     → Refresh circuit states from the shared store
//!     → Publish state gauges and hit rate
//! ```
//!
//! # Design Decisions
//! - The shared store is non-critical: losing it degrades, never fails readiness
//! - An open circuit is reported as a degraded component, not a failure
//! - The monitor stops on the shutdown broadcast

pub mod monitor;
pub mod report;

pub use monitor::StateMonitor;
pub use report::{check, AggregatedHealth, ComponentHealth, HealthStatus};
