//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded call:
//!     → circuit_breaker.rs (read-through, admit or reject, probe lock)
//!     → operation runs (optionally under a call timeout)
//!     → circuit_breaker.rs (apply outcome, update window.rs)
//!     → record.rs (encode, persist with TTL)
//!
//! Store outage:
//!     → backoff.rs (reconnect delay for the store link)
//! ```
//!
//! # Design Decisions
//! - Local state is authoritative for admission; the store only converges instances
//! - State never crosses an await while locked
//! - A call dropped mid-flight counts as a failure

pub mod backoff;
pub mod circuit_breaker;
pub mod record;
pub mod window;

pub use circuit_breaker::{CallError, CircuitBreakerBuilder, CircuitBreakerManager};
pub use record::{CircuitRecord, CircuitState};
