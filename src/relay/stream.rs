//! Streaming relay entry point: one server-streaming call per request.

use std::time::Instant;

use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::relay::error::{RelayError, Stage};
use crate::relay::outcome::Outcome;
use crate::relay::session::{RelaySession, SessionSettings};
use crate::resilience::timeouts::with_deadline;
use crate::rpc::pb::ApplyEffectsRequest;
use crate::rpc::ProcessorChannel;

/// What the client asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRequest {
    pub source: String,
    pub speed: f32,
    pub pitch: f32,
}

impl RelayRequest {
    /// Check the request against the configured factor range.
    pub fn validate(&self, config: &RelayConfig) -> Result<(), String> {
        if self.source.trim().is_empty() {
            return Err("source must not be empty".to_string());
        }
        for (name, value) in [("speed", self.speed), ("pitch", self.pitch)] {
            if !value.is_finite() || value < config.min_factor || value > config.max_factor {
                return Err(format!(
                    "{} must be between {} and {}",
                    name, config.min_factor, config.max_factor
                ));
            }
        }
        Ok(())
    }
}

/// Bridges HTTP requests to processor calls over the shared channel.
#[derive(Debug, Clone)]
pub struct StreamingRelay {
    pub(crate) channel: ProcessorChannel,
    pub(crate) config: RelayConfig,
    pub(crate) audio_dir: String,
    settings: SessionSettings,
}

impl StreamingRelay {
    pub fn new(channel: ProcessorChannel, config: RelayConfig) -> Self {
        let settings = SessionSettings::from_config(&config);
        Self {
            channel,
            config,
            audio_dir: crate::config::ProcessorConfig::default().audio_dir,
            settings,
        }
    }

    /// Directory the processor writes extracted audio into.
    pub fn with_audio_dir(mut self, audio_dir: impl Into<String>) -> Self {
        self.audio_dir = audio_dir.into();
        self
    }

    pub fn channel(&self) -> &ProcessorChannel {
        &self.channel
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Open the call and probe its first message.
    ///
    /// Opening and probing share one `probe_timeout` budget. On `Err` no
    /// session exists and nothing has been committed to the client.
    pub async fn begin_stream(&self, request: RelayRequest) -> Result<RelaySession, RelayError> {
        let call = self.channel.track_call().map_err(|e| rejected(&request, e))?;
        let call_id = call.id();
        let started = Instant::now();

        let mut client = self.channel.client();
        let message = ApplyEffectsRequest {
            audio_path: request.source.clone(),
            speed_factor: request.speed,
            pitch_factor: request.pitch,
        };
        let opened = with_deadline(Stage::Probe, self.settings.probe_timeout, async {
            client
                .apply_effects_stream(message)
                .await
                .map_err(RelayError::from)
        })
        .await;
        let stream = match opened {
            Ok(response) => response.into_inner(),
            Err(e) => return Err(rejected(&request, e)),
        };

        let remaining = self
            .settings
            .probe_timeout
            .saturating_sub(started.elapsed());
        let session = RelaySession::open(
            stream,
            self.settings.with_probe_timeout(remaining),
            Some(call),
        )
        .await
        .map_err(|e| rejected(&request, e))?;

        tracing::info!(
            call_id = %call_id,
            source = %request.source,
            speed = request.speed,
            pitch = request.pitch,
            probe_ms = started.elapsed().as_millis() as u64,
            "Relay stream started"
        );
        Ok(session)
    }
}

/// Log and count a relay that ended before a session existed.
pub(crate) fn rejected(request: &RelayRequest, err: RelayError) -> RelayError {
    metrics::record_relay_outcome(Outcome::from(&err).label());
    if err.is_busy() {
        tracing::info!(source = %request.source, "Processor busy, relay rejected");
    } else {
        tracing::warn!(source = %request.source, error = %err, kind = err.kind(), "Relay failed before streaming");
    }
    err
}
