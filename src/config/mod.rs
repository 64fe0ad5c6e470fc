//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to the breaker manager and result cache at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; per-service thresholds never change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BreakerConfig, CacheConfig, GuardConfig, LogFormat, ObservabilityConfig, ServiceConfig,
    StoreConfig,
};
pub use validation::ValidationError;
