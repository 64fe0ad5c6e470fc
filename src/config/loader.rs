//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `store.url`.
pub const STORE_URL_ENV: &str = "REDIS_URL";

/// Environment variable overriding `observability.log_format`.
pub const LOG_FORMAT_ENV: &str = "GATEWAY_GUARD_LOG_FORMAT";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GuardConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated.
pub fn default_config() -> Result<GuardConfig, ConfigError> {
    let mut config = GuardConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from a variable lookup (the process environment in production).
pub fn apply_env_overrides<F>(config: &mut GuardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(STORE_URL_ENV).filter(|v| !v.is_empty()) {
        config.store.url = url;
    }
    if let Some(raw) = lookup(LOG_FORMAT_ENV) {
        match raw.parse() {
            Ok(format) => config.observability.log_format = format,
            Err(e) => tracing::warn!(error = %e, "Ignoring {}", LOG_FORMAT_ENV),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::io::Write;

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [store]
            url = "memory://"

            [circuit_breaker.services.discovery]
            failure_threshold = 3
            timeout_seconds = 3
            error_rate_threshold = 0.5
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.circuit_breaker.service("discovery").failure_threshold, 3);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [circuit_breaker.defaults]
            error_rate_threshold = -0.1
            "#
        )
        .unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("error_rate_threshold"));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store\nurl = ").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/gateway-guard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GuardConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            STORE_URL_ENV => Some("redis://cache.internal:6380".to_string()),
            LOG_FORMAT_ENV => Some("json".to_string()),
            _ => None,
        });
        assert_eq!(config.store.url, "redis://cache.internal:6380");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
