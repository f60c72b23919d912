//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{LimiterScope, RelayServiceConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply env overrides.
pub fn load_config(path: &Path) -> Result<RelayServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: RelayServiceConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build configuration from defaults plus env overrides, for runs without a file.
pub fn load_from_env() -> Result<RelayServiceConfig, ConfigError> {
    let mut config = RelayServiceConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `RATE_LIMIT_RPS`, `RATE_LIMIT_SCOPE` and `PROCESSOR_ENDPOINT`.
///
/// Blank or unparseable values are ignored and the configured value kept.
pub fn apply_env_overrides<F>(config: &mut RelayServiceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(raw) = non_blank("RATE_LIMIT_RPS") {
        match raw.trim().parse::<u32>() {
            Ok(rps) if rps > 0 => {
                config.rate_limit.capacity = rps;
                config.rate_limit.refill_per_second = f64::from(rps);
            }
            _ => tracing::warn!(value = %raw, "Ignoring invalid RATE_LIMIT_RPS"),
        }
    }

    if let Some(raw) = non_blank("RATE_LIMIT_SCOPE") {
        match raw.parse::<LimiterScope>() {
            Ok(scope) => config.rate_limit.scope = scope,
            Err(e) => tracing::warn!(error = %e, "Ignoring invalid RATE_LIMIT_SCOPE"),
        }
    }

    if let Some(endpoint) = non_blank("PROCESSOR_ENDPOINT") {
        config.processor.endpoint = endpoint.trim().to_string();
    }
}
