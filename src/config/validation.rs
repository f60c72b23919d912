//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacities > 0, factor bounds)
//! - Check the processor endpoint and its transport security agree
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{LimiterScope, RelayServiceConfig};

/// Slowest accepted refill: one token every ~17 minutes.
pub const MIN_REFILL_PER_SECOND: f64 = 0.001;

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check the configuration, collecting every error found.
pub fn validate_config(config: &RelayServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    validate_processor(config, &mut errors);
    validate_relay(config, &mut errors);
    validate_rate_limit(config, &mut errors);

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be positive"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_processor(config: &RelayServiceConfig, errors: &mut Vec<ValidationError>) {
    let processor = &config.processor;

    match Url::parse(&processor.endpoint) {
        Ok(url) => match (url.scheme(), processor.tls.is_some()) {
            ("http", true) => errors.push(ValidationError::new(
                "processor.endpoint",
                "TLS is configured but the endpoint scheme is http",
            )),
            ("https", _) | ("http", false) => {}
            (other, _) => errors.push(ValidationError::new(
                "processor.endpoint",
                format!("unsupported scheme '{}'", other),
            )),
        },
        Err(e) => errors.push(ValidationError::new(
            "processor.endpoint",
            format!("invalid URL: {}", e),
        )),
    }

    if let Some(tls) = &processor.tls {
        if tls.client_cert_path.is_some() != tls.client_key_path.is_some() {
            errors.push(ValidationError::new(
                "processor.tls",
                "client_cert_path and client_key_path must be set together",
            ));
        }
    }

    if processor.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "processor.connect_timeout_secs",
            "must be positive",
        ));
    }
}

fn validate_relay(config: &RelayServiceConfig, errors: &mut Vec<ValidationError>) {
    let relay = &config.relay;

    if relay.queue_capacity == 0 {
        errors.push(ValidationError::new("relay.queue_capacity", "must be positive"));
    }
    for (field, value) in [
        ("relay.probe_timeout_secs", relay.probe_timeout_secs),
        ("relay.completion_timeout_secs", relay.completion_timeout_secs),
        ("relay.info_timeout_secs", relay.info_timeout_secs),
        ("relay.extract_timeout_secs", relay.extract_timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be positive"));
        }
    }
    if !(relay.min_factor > 0.0 && relay.min_factor <= relay.max_factor) {
        errors.push(ValidationError::new(
            "relay.min_factor",
            format!(
                "factor range [{}, {}] must be positive and ordered",
                relay.min_factor, relay.max_factor
            ),
        ));
    }
}

fn validate_rate_limit(config: &RelayServiceConfig, errors: &mut Vec<ValidationError>) {
    let limit = &config.rate_limit;
    if !limit.enabled {
        return;
    }

    if limit.capacity == 0 {
        errors.push(ValidationError::new("rate_limit.capacity", "must be positive"));
    }
    if !(limit.refill_per_second.is_finite() && limit.refill_per_second >= MIN_REFILL_PER_SECOND) {
        errors.push(ValidationError::new(
            "rate_limit.refill_per_second",
            format!("must be a number of at least {}", MIN_REFILL_PER_SECOND),
        ));
        return;
    }

    // An evicted bucket must be indistinguishable from a fresh one, so it
    // has to have refilled completely before it can be dropped.
    if let (LimiterScope::PerKey, Some(ttl)) = (limit.scope, limit.idle_eviction_secs) {
        let time_to_full = f64::from(limit.capacity) / limit.refill_per_second;
        if (ttl as f64) < time_to_full {
            errors.push(ValidationError::new(
                "rate_limit.idle_eviction_secs",
                format!("must be at least {:.1}s (time to refill a bucket)", time_to_full),
            ));
        }
    }
}
