//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayServiceConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Connection to the external audio processor.
    pub processor: ProcessorConfig,

    /// Streaming relay behaviour (queue depth, bounds).
    pub relay: RelayConfig,

    /// Admission limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Audio processor connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// gRPC endpoint (e.g., "http://127.0.0.1:50051").
    pub endpoint: String,

    /// Transport security. `None` means a plaintext channel.
    pub tls: Option<ProcessorTlsConfig>,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Grace period for in-flight calls at shutdown, in seconds.
    pub shutdown_grace_secs: u64,

    /// Directory the processor writes extracted audio into.
    pub audio_dir: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:50051".to_string(),
            tls: None,
            connect_timeout_secs: 5,
            shutdown_grace_secs: 5,
            audio_dir: "./data/audio".to_string(),
        }
    }
}

/// Transport security material for the processor channel.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorTlsConfig {
    /// CA bundle used to verify the processor. Platform roots when absent.
    pub ca_cert_path: Option<String>,

    /// Client certificate for mutual TLS.
    pub client_cert_path: Option<String>,

    /// Client private key for mutual TLS.
    pub client_key_path: Option<String>,

    /// Overrides the server name checked against the certificate.
    pub domain_name: Option<String>,
}

/// Streaming relay settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Chunks buffered between the RPC reader and the HTTP writer.
    pub queue_capacity: usize,

    /// Bound on the first read of a stream, in seconds.
    pub probe_timeout_secs: u64,

    /// Bound on waiting for the terminal outcome after the last chunk.
    pub completion_timeout_secs: u64,

    /// `Retry-After` value sent when the processor is busy.
    pub busy_retry_after_secs: u64,

    /// Bound on `GetAudioInfo` calls, in seconds.
    pub info_timeout_secs: u64,

    /// Bound on `ExtractAudio` calls, in seconds.
    pub extract_timeout_secs: u64,

    /// Smallest accepted speed/pitch factor.
    pub min_factor: f32,

    /// Largest accepted speed/pitch factor.
    pub max_factor: f32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            probe_timeout_secs: 60,
            completion_timeout_secs: 10,
            busy_retry_after_secs: 2,
            info_timeout_secs: 30,
            extract_timeout_secs: 60,
            min_factor: 0.5,
            max_factor: 2.0,
        }
    }
}

impl RelayConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

/// Whether admission is tracked per client or shared by everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    /// One bucket per client key.
    #[default]
    #[serde(alias = "ip")]
    PerKey,
    /// One bucket shared by all clients.
    Global,
}

impl LimiterScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterScope::PerKey => "per_key",
            LimiterScope::Global => "global",
        }
    }
}

impl std::str::FromStr for LimiterScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" | "per_key" | "per-key" => Ok(LimiterScope::PerKey),
            "global" => Ok(LimiterScope::Global),
            other => Err(format!("unknown limiter scope '{}'", other)),
        }
    }
}

/// Admission limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable admission limiting.
    pub enabled: bool,

    /// Bucket capacity (burst size).
    pub capacity: u32,

    /// Tokens added per second.
    pub refill_per_second: f64,

    /// Per-key or global bucket.
    pub scope: LimiterScope,

    /// Drop per-key buckets idle for this long. `None` keeps them forever.
    pub idle_eviction_secs: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 5,
            refill_per_second: 5.0,
            scope: LimiterScope::PerKey,
            idle_eviction_secs: Some(60),
        }
    }
}

/// Timeout configuration for the HTTP side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to produce response headers, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 90 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
