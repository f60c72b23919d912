//! Unary processor calls sharing the relay's channel and busy contract.

use std::path::Path;

use serde::Serialize;

use crate::relay::error::{RelayError, Stage};
use crate::relay::stream::StreamingRelay;
use crate::resilience::timeouts::with_deadline;
use crate::rpc::pb::{AudioInfoRequest, ExtractAudioRequest};

/// Metadata reported by the processor for an audio file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInfo {
    pub duration_seconds: f32,
    pub sample_rate: i32,
    pub channels: i32,
    pub bitrate_kbps: i32,
    pub format: String,
}

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedAudio {
    pub audio_path: String,
    pub duration_seconds: f32,
    pub file_size_bytes: i64,
}

/// Normalize a requested output format; empty means mp3.
pub fn output_format(format: Option<&str>) -> String {
    match format.map(str::trim) {
        Some(f) if !f.is_empty() => f.to_lowercase(),
        _ => "mp3".to_string(),
    }
}

impl StreamingRelay {
    pub async fn audio_info(&self, audio_path: &str) -> Result<AudioInfo, RelayError> {
        let _call = self.channel.track_call()?;
        let mut client = self.channel.client();
        let request = AudioInfoRequest {
            audio_path: audio_path.to_string(),
        };

        let limit = std::time::Duration::from_secs(self.config.info_timeout_secs);
        let response = with_deadline(Stage::Call, limit, async {
            client.get_audio_info(request).await.map_err(RelayError::from)
        })
        .await
        .inspect_err(|e| tracing::warn!(path = %audio_path, error = %e, "Audio info call failed"))?
        .into_inner();

        Ok(AudioInfo {
            duration_seconds: response.duration_seconds,
            sample_rate: response.sample_rate,
            channels: response.channels,
            bitrate_kbps: response.bitrate_kbps,
            format: response.format,
        })
    }

    /// Extract the audio track of `video_path` into `audio_dir`.
    pub async fn extract_audio(
        &self,
        video_path: &str,
        format: Option<&str>,
        bitrate_kbps: i32,
    ) -> Result<ExtractedAudio, RelayError> {
        let _call = self.channel.track_call()?;
        let format = output_format(format);
        let output_path = Path::new(&self.audio_dir)
            .join(format!("{}.{}", uuid::Uuid::new_v4(), format))
            .display()
            .to_string();

        let mut client = self.channel.client();
        let request = ExtractAudioRequest {
            video_path: video_path.to_string(),
            output_path: output_path.clone(),
            format,
            bitrate_kbps,
        };

        let limit = std::time::Duration::from_secs(self.config.extract_timeout_secs);
        let response = with_deadline(Stage::Call, limit, async {
            client.extract_audio(request).await.map_err(RelayError::from)
        })
        .await
        .inspect_err(|e| tracing::warn!(video = %video_path, error = %e, "Extraction call failed"))?
        .into_inner();

        if !response.success {
            tracing::warn!(video = %video_path, error = %response.error_message, "Processor reported failed extraction");
            return Err(RelayError::Protocol(format!(
                "extraction failed: {}",
                response.error_message
            )));
        }

        tracing::info!(
            video = %video_path,
            audio = %response.audio_path,
            bytes = response.file_size_bytes,
            "Audio extracted"
        );
        Ok(ExtractedAudio {
            audio_path: if response.audio_path.is_empty() {
                output_path
            } else {
                response.audio_path
            },
            duration_seconds: response.duration_seconds,
            file_size_bytes: response.file_size_bytes,
        })
    }
}
