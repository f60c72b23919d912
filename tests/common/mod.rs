//! Shared utilities for integration tests: an in-process audio processor
//! and helpers to start the relay against it.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{transport::Server, Request, Response, Status};

use clip_relay::config::RelayServiceConfig;
use clip_relay::lifecycle::{Application, Shutdown};
use clip_relay::rpc::pb::audio_processor_server::{AudioProcessor, AudioProcessorServer};
use clip_relay::rpc::pb::{
    ApplyEffectsRequest, AudioChunk, AudioInfoRequest, AudioInfoResponse, ExtractAudioRequest,
    ExtractAudioResponse,
};
use clip_relay::rpc::ProcessorChannel;

/// Chunk sizes served for any source without a special meaning.
pub const DEFAULT_SIZES: &[usize] = &[100, 0, 50];

/// Scripted processor. Behavior is picked by the requested path:
///
/// - `busy`: rejects the call with RESOURCE_EXHAUSTED
/// - `busy-first`: opens the stream, then fails it with RESOURCE_EXHAUSTED
/// - `empty`: completes without chunks
/// - `fail-mid`: two chunks, then INTERNAL
/// - `gap`: skips a sequence number
/// - `hang`: never sends anything
/// - `endless`: sends until the caller goes away
/// - `sizes:a,b,c`: chunks of the given sizes
/// - anything else: [`DEFAULT_SIZES`]
#[derive(Clone, Default)]
pub struct MockProcessor {
    pub cancelled: Arc<AtomicBool>,
    pub stream_requests: Arc<Mutex<Vec<ApplyEffectsRequest>>>,
    pub extract_requests: Arc<Mutex<Vec<ExtractAudioRequest>>>,
}

impl MockProcessor {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_requests.lock().unwrap().len()
    }
}

fn chunk(sequence_number: i32, data: Vec<u8>) -> Result<AudioChunk, Status> {
    Ok(AudioChunk {
        data: Bytes::from(data),
        sequence_number,
    })
}

/// Body expected for `sizes`: chunk `i` is `sizes[i]` copies of byte `i`.
pub fn expected_body(sizes: &[usize]) -> Vec<u8> {
    sizes
        .iter()
        .enumerate()
        .flat_map(|(i, &n)| std::iter::repeat(i as u8).take(n))
        .collect()
}

fn parse_sizes(path: &str) -> Vec<usize> {
    match path.strip_prefix("sizes:") {
        Some(list) => list
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect(),
        None => DEFAULT_SIZES.to_vec(),
    }
}

#[tonic::async_trait]
impl AudioProcessor for MockProcessor {
    type ApplyEffectsStreamStream = ReceiverStream<Result<AudioChunk, Status>>;

    async fn apply_effects_stream(
        &self,
        request: Request<ApplyEffectsRequest>,
    ) -> Result<Response<Self::ApplyEffectsStreamStream>, Status> {
        let request = request.into_inner();
        let path = request.audio_path.clone();
        self.stream_requests.lock().unwrap().push(request);

        if path == "busy" {
            return Err(Status::resource_exhausted("Processor busy"));
        }

        let (tx, rx) = mpsc::channel(1);
        let cancelled = Arc::clone(&self.cancelled);
        tokio::spawn(async move {
            match path.as_str() {
                "busy-first" => {
                    let _ = tx.send(Err(Status::resource_exhausted("Processor busy"))).await;
                }
                "empty" => {}
                "fail-mid" => {
                    let _ = tx.send(chunk(0, vec![0; 10])).await;
                    let _ = tx.send(chunk(1, vec![1; 10])).await;
                    let _ = tx.send(Err(Status::internal("encoder crashed"))).await;
                }
                "gap" => {
                    let _ = tx.send(chunk(0, vec![0; 10])).await;
                    let _ = tx.send(chunk(2, vec![2; 10])).await;
                }
                "hang" => {
                    tx.closed().await;
                }
                "endless" => {
                    let mut seq = 0;
                    loop {
                        if tx.send(chunk(seq, vec![7; 16 * 1024])).await.is_err() {
                            cancelled.store(true, Ordering::SeqCst);
                            break;
                        }
                        seq += 1;
                    }
                }
                other => {
                    for (i, size) in parse_sizes(other).into_iter().enumerate() {
                        if tx.send(chunk(i as i32, vec![i as u8; size])).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_audio_info(
        &self,
        request: Request<AudioInfoRequest>,
    ) -> Result<Response<AudioInfoResponse>, Status> {
        match request.into_inner().audio_path.as_str() {
            "busy" => Err(Status::resource_exhausted("Processor busy")),
            "missing" => Err(Status::not_found("no such file")),
            _ => Ok(Response::new(AudioInfoResponse {
                duration_seconds: 3.5,
                sample_rate: 44_100,
                channels: 2,
                bitrate_kbps: 128,
                format: "mp3".into(),
            })),
        }
    }

    async fn extract_audio(
        &self,
        request: Request<ExtractAudioRequest>,
    ) -> Result<Response<ExtractAudioResponse>, Status> {
        let request = request.into_inner();
        self.extract_requests.lock().unwrap().push(request.clone());
        match request.video_path.as_str() {
            "busy" => Err(Status::resource_exhausted("Processor busy")),
            "broken" => Ok(Response::new(ExtractAudioResponse {
                success: false,
                error_message: "ffmpeg exited with status 1".into(),
                ..Default::default()
            })),
            _ => Ok(Response::new(ExtractAudioResponse {
                success: true,
                audio_path: request.output_path,
                duration_seconds: 3.5,
                file_size_bytes: 2048,
                error_message: String::new(),
            })),
        }
    }
}

/// Serve `mock` on an ephemeral port.
pub async fn start_processor(mock: MockProcessor) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(AudioProcessorServer::new(mock))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

/// Relay configuration pointing at `processor`, listening on an ephemeral port.
pub fn relay_config(processor: SocketAddr) -> RelayServiceConfig {
    let mut config = RelayServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.processor.endpoint = format!("http://{}", processor);
    config.processor.shutdown_grace_secs = 1;
    config.relay.probe_timeout_secs = 2;
    config.relay.completion_timeout_secs = 2;
    config.rate_limit.capacity = 1_000;
    config.rate_limit.refill_per_second = 1_000.0;
    config
}

pub fn channel_to(processor: SocketAddr) -> ProcessorChannel {
    let config = relay_config(processor);
    ProcessorChannel::connect(&config.processor).unwrap()
}

/// A running relay service.
pub struct RunningRelay {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
}

impl RunningRelay {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_relay(config: RelayServiceConfig) -> RunningRelay {
    let app = Application::build(config).await.unwrap();
    let addr = app.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let run_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = app.run(run_shutdown).await;
    });
    // Give the accept loop a moment to subscribe.
    tokio::time::sleep(Duration::from_millis(50)).await;
    RunningRelay { addr, shutdown }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
