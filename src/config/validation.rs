//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, error rate within [0, 1])
//! - Check that the store URL and metrics address parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before any guarded call is accepted

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerConfig, CacheConfig, GuardConfig, ServiceConfig, StoreConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("{field}: minimum_calls ({minimum_calls}) exceeds window_size ({window_size})")]
    WindowTooSmall {
        field: String,
        minimum_calls: usize,
        window_size: usize,
    },

    #[error("invalid store url '{url}': {reason}")]
    StoreUrl { url: String, reason: String },

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

fn positive(errors: &mut Vec<ValidationError>, field: impl Into<String>, value: u64) {
    if value == 0 {
        errors.push(ValidationError::NotPositive { field: field.into() });
    }
}

/// Validate the whole configuration tree.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_store(&config.store, &mut errors);
    errors.extend(validate_breaker(&config.circuit_breaker).err().unwrap_or_default());
    validate_cache(&config.cache, &mut errors);

    positive(
        &mut errors,
        "observability.monitor_interval_secs",
        config.observability.monitor_interval_secs,
    );
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate breaker settings alone; the manager runs this at construction.
pub fn validate_breaker(config: &BreakerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    positive(&mut errors, "circuit_breaker.state_ttl_secs", config.state_ttl_secs);
    validate_service("circuit_breaker.defaults", &config.defaults, &mut errors);

    let mut names: Vec<&String> = config.services.keys().collect();
    names.sort();
    for name in names {
        let prefix = format!("circuit_breaker.services.{name}");
        validate_service(&prefix, &config.services[name], &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(prefix: &str, service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    positive(errors, format!("{prefix}.failure_threshold"), u64::from(service.failure_threshold));
    positive(errors, format!("{prefix}.timeout_seconds"), service.timeout_seconds);
    positive(errors, format!("{prefix}.window_size"), service.window_size as u64);

    let rate = service.error_rate_threshold;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::OutOfRange {
            field: format!("{prefix}.error_rate_threshold"),
            value: rate,
        });
    }

    if service.minimum_calls > service.window_size {
        errors.push(ValidationError::WindowTooSmall {
            field: prefix.to_string(),
            minimum_calls: service.minimum_calls,
            window_size: service.window_size,
        });
    }

    if let Some(ms) = service.call_timeout_ms {
        positive(errors, format!("{prefix}.call_timeout_ms"), ms);
    }
}

fn validate_store(store: &StoreConfig, errors: &mut Vec<ValidationError>) {
    positive(errors, "store.pool_size", store.pool_size as u64);
    positive(errors, "store.connect_timeout_ms", store.connect_timeout_ms);
    positive(errors, "store.op_timeout_ms", store.op_timeout_ms);
    positive(errors, "store.bulk_timeout_ms", store.bulk_timeout_ms);
    positive(errors, "store.reconnect_base_ms", store.reconnect_base_ms);
    positive(errors, "store.reconnect_max_ms", store.reconnect_max_ms);

    if !store.enabled {
        return;
    }
    match url::Url::parse(&store.url) {
        Ok(parsed) => match parsed.scheme() {
            "redis" | "rediss" | "memory" => {}
            other => errors.push(ValidationError::StoreUrl {
                url: store.url.clone(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        },
        Err(e) => errors.push(ValidationError::StoreUrl {
            url: store.url.clone(),
            reason: e.to_string(),
        }),
    }
}

fn validate_cache(cache: &CacheConfig, errors: &mut Vec<ValidationError>) {
    positive(errors, "cache.search_ttl_secs", cache.search_ttl_secs);
    positive(errors, "cache.intent_ttl_secs", cache.intent_ttl_secs);
    positive(errors, "cache.embedding_ttl_secs", cache.embedding_ttl_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GuardConfig::default();
        config.circuit_breaker.defaults.failure_threshold = 0;
        config.circuit_breaker.defaults.error_rate_threshold = 1.5;
        config.store.url = "ftp://example.com".to_string();
        config.cache.intent_ttl_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NotPositive {
            field: "circuit_breaker.defaults.failure_threshold".to_string()
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::StoreUrl { .. })));
    }

    #[test]
    fn test_per_service_errors_name_the_service() {
        let config = BreakerConfig::default().with_service(
            "discovery",
            ServiceConfig {
                timeout_seconds: 0,
                ..ServiceConfig::default()
            },
        );

        let errors = validate_breaker(&config).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "circuit_breaker.services.discovery.timeout_seconds must be greater than zero"
        );
    }

    #[test]
    fn test_minimum_calls_bounded_by_window() {
        let config = BreakerConfig {
            defaults: ServiceConfig {
                window_size: 5,
                minimum_calls: 6,
                ..ServiceConfig::default()
            },
            ..BreakerConfig::default()
        };
        let errors = validate_breaker(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::WindowTooSmall { .. }));
    }

    #[test]
    fn test_disabled_store_skips_url_check() {
        let mut config = GuardConfig::default();
        config.store.enabled = false;
        config.store.url = "not a url".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
