//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (admission, request ID, timeout, tracing, metrics)
//! - Bind server to listener, plain or TLS
//! - Stop accepting on shutdown and give in-flight responses a bounded drain

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::RelayServiceConfig;
use crate::http::request::MakeRequestUuid;
use crate::http::stream::{audio_info, health, stream_audio};
use crate::observability::metrics;
use crate::relay::StreamingRelay;
use crate::security::{admission_middleware, AdmissionLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: StreamingRelay,
}

/// HTTP front end of the relay.
pub struct HttpServer {
    router: Router,
    config: RelayServiceConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: RelayServiceConfig, relay: StreamingRelay) -> Self {
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(AdmissionLimiter::new(&config.rate_limit)));
        let state = AppState { relay };
        let router = Self::build_router(&config, state, limiter);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        config: &RelayServiceConfig,
        state: AppState,
        limiter: Option<Arc<AdmissionLimiter>>,
    ) -> Router {
        let mut api = Router::new()
            .route("/api/stream", get(stream_audio))
            .route("/api/audio-info", get(audio_info));
        if let Some(limiter) = limiter {
            api = api.route_layer(middleware::from_fn_with_state(limiter, admission_middleware));
        }

        Router::new()
            .merge(api)
            .route("/health", get(health))
            .with_state(state)
            .layer(middleware::from_fn(track_requests))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.timeouts.request_secs),
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// Open responses get `drain` to finish once shutdown fires. A streamed
    /// body still open after that is abandoned and `run` returns anyway.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
        drain: Duration,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let (stopping_tx, stopping_rx) = oneshot::channel::<()>();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server no longer accepting connections");
                let _ = stopping_tx.send(());
            })
            .into_future();
        tokio::pin!(serve);

        let drain_elapsed = async {
            match stopping_rx.await {
                Ok(()) => tokio::time::sleep(drain).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            served = &mut serve => served?,
            _ = drain_elapsed => {
                tracing::warn!(drain = ?drain, "Drain period elapsed, abandoning open responses");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve TLS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: axum_server::tls_rustls::RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
        drain: Duration,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server no longer accepting connections");
            signal.graceful_shutdown(Some(drain));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RelayServiceConfig {
        &self.config
    }
}

/// Count requests by method and final status.
async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessorConfig, RateLimitConfig};
    use crate::rpc::ProcessorChannel;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn server(rate_limit: RateLimitConfig) -> HttpServer {
        let config = RelayServiceConfig {
            rate_limit,
            ..Default::default()
        };
        let channel = ProcessorChannel::connect(&ProcessorConfig {
            endpoint: "http://127.0.0.1:1".into(),
            ..Default::default()
        })
        .unwrap();
        let relay = StreamingRelay::new(channel, config.relay.clone());
        HttpServer::new(config, relay)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_gets_a_request_id() {
        let response = server(RateLimitConfig::default())
            .router()
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn out_of_range_factor_is_rejected_before_any_call() {
        let server = server(RateLimitConfig::default());
        let response = server
            .router()
            .oneshot(get("/api/stream?source=clip.mp3&speed=9"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admission_denies_once_the_bucket_is_empty() {
        let router = server(RateLimitConfig {
            capacity: 1,
            refill_per_second: 0.01,
            ..Default::default()
        })
        .router();

        let first = router
            .clone()
            .oneshot(get("/api/stream?source=clip.mp3&speed=9"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);

        let second = router
            .oneshot(get("/api/stream?source=clip.mp3"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn disabled_limiter_adds_no_headers() {
        let response = server(RateLimitConfig {
            enabled: false,
            ..Default::default()
        })
        .router()
        .oneshot(get("/api/stream?source=clip.mp3&speed=9"))
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!response.headers().contains_key("x-ratelimit-remaining"));
    }
}
