//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Broadcast to background tasks → Wait for them within a grace period → Abort stragglers
//! ```
//!
//! # Design Decisions
//! - Background tasks subscribe before they start, so no signal is missed
//! - Shutdown has a deadline: tasks still running afterwards are aborted

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
