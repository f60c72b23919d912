//! Long-lived channel to the audio processor.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::Code;

use crate::config::{ProcessorConfig, ProcessorTlsConfig};
use crate::relay::error::RelayError;
use crate::rpc::inflight::{CallGuard, InflightCalls};
use crate::rpc::pb::audio_processor_client::AudioProcessorClient;
use crate::rpc::tls::{client_tls_config, TlsError};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid processor endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Shared channel plus the bookkeeping needed to close it gracefully.
///
/// Clones share the underlying connection and in-flight counter.
#[derive(Debug, Clone)]
pub struct ProcessorChannel {
    channel: Channel,
    inflight: InflightCalls,
    endpoint: String,
}

impl ProcessorChannel {
    /// Build the channel. No connection is attempted until the first call.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: &ProcessorConfig) -> Result<Self, ChannelError> {
        let invalid = |source| ChannelError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            source,
        };

        let mut endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(invalid)?
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        let secure = config.endpoint.starts_with("https://");
        match (&config.tls, secure) {
            (Some(tls), _) => {
                endpoint = endpoint.tls_config(client_tls_config(tls)?).map_err(invalid)?;
            }
            (None, true) => {
                let defaults = ProcessorTlsConfig::default();
                endpoint = endpoint
                    .tls_config(client_tls_config(&defaults)?)
                    .map_err(invalid)?;
            }
            (None, false) => {
                tracing::warn!(
                    endpoint = %config.endpoint,
                    "Processor channel is not encrypted; configure processor.tls for production"
                );
            }
        }

        let channel = endpoint.connect_lazy();
        tracing::info!(endpoint = %config.endpoint, tls = config.tls.is_some() || secure, "Processor channel ready");

        Ok(Self {
            channel,
            inflight: InflightCalls::new(),
            endpoint: config.endpoint.clone(),
        })
    }

    /// Wrap an existing channel (tests, custom connectors).
    pub fn from_channel(channel: Channel, endpoint: impl Into<String>) -> Self {
        Self {
            channel,
            inflight: InflightCalls::new(),
            endpoint: endpoint.into(),
        }
    }

    /// A client stub over the shared channel.
    pub fn client(&self) -> AudioProcessorClient<Channel> {
        AudioProcessorClient::new(self.channel.clone())
    }

    /// Register a new call, or fail if the channel is closing.
    pub fn track_call(&self) -> Result<CallGuard, RelayError> {
        self.inflight.track().ok_or_else(|| RelayError::Transport {
            code: Code::Unavailable,
            message: "processor channel is closing".into(),
        })
    }

    pub fn inflight(&self) -> &InflightCalls {
        &self.inflight
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Refuse new calls and wait up to `grace` for open ones to finish.
    ///
    /// Returns `true` if every call finished within the grace period.
    pub async fn close(&self, grace: Duration) -> bool {
        self.inflight.begin_close();
        let open = self.inflight.active_count();
        tracing::info!(open_calls = open, grace = ?grace, "Closing processor channel");

        let drained = self.inflight.wait_drained(grace).await;
        if drained {
            tracing::info!("Processor channel drained");
        } else {
            tracing::warn!(
                open_calls = self.inflight.active_count(),
                "Processor calls still open after grace period"
            );
        }
        drained
    }
}
