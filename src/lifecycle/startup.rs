//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize subsystems in dependency order
//! - Bind the listener last, so traffic only arrives once ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, including unreadable TLS material
//! - The processor may still be down at startup; the channel connects lazily

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;

use crate::config::{load_config, load_from_env, ConfigError, RelayServiceConfig};
use crate::http::tls::load_listener_tls;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::relay::StreamingRelay;
use crate::rpc::{ChannelError, ProcessorChannel};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("processor channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener TLS error: {0}")]
    ListenerTls(#[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Read configuration from `path`, or from defaults plus environment.
pub fn load_configuration(path: Option<&Path>) -> Result<RelayServiceConfig, StartupError> {
    let config = match path {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    Ok(config)
}

enum Bound {
    Plain(TcpListener),
    Tls { addr: SocketAddr, config: RustlsConfig },
}

/// A fully initialized relay service, ready to serve.
pub struct Application {
    channel: ProcessorChannel,
    server: HttpServer,
    bound: Bound,
    shutdown_grace: Duration,
}

impl Application {
    /// Initialize every subsystem and bind the listener.
    pub async fn build(config: RelayServiceConfig) -> Result<Self, StartupError> {
        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        let channel = ProcessorChannel::connect(&config.processor)?;
        let relay = StreamingRelay::new(channel.clone(), config.relay.clone())
            .with_audio_dir(config.processor.audio_dir.clone());

        let bind_err = |source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        };
        let bound = match &config.listener.tls {
            Some(tls) => {
                let addr: SocketAddr = config.listener.bind_address.parse().map_err(|e| {
                    bind_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
                })?;
                let rustls = load_listener_tls(Path::new(&tls.cert_path), Path::new(&tls.key_path))
                    .await
                    .map_err(StartupError::ListenerTls)?;
                Bound::Tls {
                    addr,
                    config: rustls,
                }
            }
            None => Bound::Plain(
                TcpListener::bind(&config.listener.bind_address)
                    .await
                    .map_err(bind_err)?,
            ),
        };

        tracing::info!(
            bind_address = %config.listener.bind_address,
            processor = %config.processor.endpoint,
            rate_limit = config.rate_limit.enabled,
            scope = config.rate_limit.scope.as_str(),
            queue_capacity = config.relay.queue_capacity,
            "Relay initialized"
        );

        let shutdown_grace = Duration::from_secs(config.processor.shutdown_grace_secs);
        let server = HttpServer::new(config, relay);
        Ok(Self {
            channel,
            server,
            bound,
            shutdown_grace,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        match &self.bound {
            Bound::Plain(listener) => listener.local_addr(),
            Bound::Tls { addr, .. } => Ok(*addr),
        }
    }

    pub fn channel(&self) -> &ProcessorChannel {
        &self.channel
    }

    /// Serve until `shutdown` fires, then close the processor channel.
    pub async fn run(self, shutdown: Arc<Shutdown>) -> Result<(), StartupError> {
        let Self {
            channel,
            server,
            bound,
            shutdown_grace,
        } = self;

        let served = match bound {
            Bound::Plain(listener) => {
                server
                    .run(listener, shutdown.subscribe(), shutdown_grace)
                    .await
            }
            Bound::Tls { addr, config } => {
                server
                    .run_tls(addr, config, shutdown.subscribe(), shutdown_grace)
                    .await
            }
        };

        channel.close(shutdown_grace).await;
        served.map_err(StartupError::Serve)
    }
}
