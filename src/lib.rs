//! Gateway guard: circuit breakers and a result cache over a shared store.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                    GATEWAY GUARD                      │
//!                 │                                                       │
//!   guarded call  │  ┌────────────────────┐                               │
//!   ──────────────┼─▶│ resilience         │──┐                            │
//!                 │  │ CircuitBreaker-    │  │   ┌───────────┐            │
//!                 │  │ Manager            │  ├──▶│ store     │──────────┼──▶ Redis
//!                 │  └────────────────────┘  │   │ StoreLink │            │   (or memory)
//!   cache lookup  │  ┌────────────────────┐  │   │ + backend │            │
//!   ──────────────┼─▶│ cache              │──┘   └───────────┘            │
//!                 │  │ ResultCache        │                               │
//!                 │  └────────────────────┘                               │
//!                 │                                                       │
//!                 │  ┌─────────────────────────────────────────────────┐  │
//!                 │  │              Cross-Cutting Concerns              │  │
//!                 │  │  config · clock · health · observability ·       │  │
//!                 │  │  lifecycle                                       │  │
//!                 │  └─────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────┘
//! ```
//!
//! Both subsystems consume the same [`store::StateStore`] independently and
//! keep working on local state when it is unreachable.

pub mod cache;
pub mod clock;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod store;

pub use cache::{CacheCategory, CacheStats, ResultCache};
pub use config::{GuardConfig, ServiceConfig};
pub use lifecycle::Shutdown;
pub use resilience::{CallError, CircuitBreakerManager, CircuitState};
pub use store::{MemoryStore, StateStore, StoreError};
