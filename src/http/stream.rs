//! Relay and info handlers.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde::Serialize;

use crate::http::request::{request_id, InfoQuery, StreamQuery};
use crate::http::response::AppError;
use crate::http::server::AppState;
use crate::relay::{AudioInfo, RelayRequest};

/// `GET /api/stream`: relay processed audio as it is produced.
///
/// Status and headers are decided by the probe read. Anything that goes
/// wrong after that aborts the body.
pub async fn stream_audio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    let request_id = request_id(&headers).to_string();
    let request = RelayRequest {
        source: query.source,
        speed: query.speed.unwrap_or(1.0),
        pitch: query.pitch.unwrap_or(1.0),
    };
    request
        .validate(state.relay.config())
        .map_err(AppError::BadRequest)?;

    let retry_after = state.relay.config().busy_retry_after_secs;
    let session = state
        .relay
        .begin_stream(request)
        .await
        .map_err(|e| AppError::from_relay(e, retry_after))?;

    tracing::debug!(request_id = %request_id, "Streaming relay response");
    let body = session.into_stream().map(move |item| {
        if let Err(e) = &item {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                kind = e.kind(),
                "Relay aborted mid-stream"
            );
        }
        item
    });

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CONTENT_DISPOSITION, "inline"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// `GET /api/audio-info`: processor metadata for a stored clip.
pub async fn audio_info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<AudioInfo>, AppError> {
    if query.source.trim().is_empty() {
        return Err(AppError::BadRequest("source must not be empty".into()));
    }
    let retry_after = state.relay.config().busy_retry_after_secs;
    state
        .relay
        .audio_info(&query.source)
        .await
        .map(Json)
        .map_err(|e| AppError::from_relay(e, retry_after))
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub version: &'static str,
    pub inflight_calls: u64,
}

/// `GET /health`: liveness only; does not call the processor.
pub async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        inflight_calls: state.relay.channel().inflight().active_count(),
    })
}
