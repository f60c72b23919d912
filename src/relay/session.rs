//! A single streaming relay: probe, bounded queue and drain.
//!
//! # Data Flow
//! ```text
//! processor stream ──► producer task ──► mpsc(queue_capacity) ──► next_chunk / drain ──► sink
//!                          │                                          │
//!                          └──────────── OutcomeCell (set once) ◄─────┘
//! ```
//!
//! # Design Decisions
//! - The first chunk is read before the session exists. A busy rejection on
//!   that read means no session and nothing written to the client.
//! - The queue is bounded; the producer blocks on `send` when the client is
//!   slow, which in turn stops it pulling from the processor.
//! - The producer records the outcome before pushing the end marker, so a
//!   consumer that sees the marker can read the outcome without waiting in
//!   the common case.
//! - Dropping the session aborts the producer, which drops the processor
//!   stream and cancels the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::{Code, Status};

use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::relay::error::{classify, RelayError, Stage};
use crate::relay::outcome::{Outcome, OutcomeCell};
use crate::rpc::inflight::CallGuard;
use crate::rpc::pb::AudioChunk;

/// Queue element. `End` is pushed once, after the outcome is recorded.
#[derive(Debug)]
enum Frame {
    Chunk(Bytes),
    End,
}

/// Bounds applied to one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub probe_timeout: Duration,
    pub completion_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            probe_timeout: config.probe_timeout(),
            completion_timeout: config.completion_timeout(),
        }
    }

    /// Same settings with a shorter probe budget.
    pub fn with_probe_timeout(self, probe_timeout: Duration) -> Self {
        Self {
            probe_timeout,
            ..self
        }
    }
}

/// Totals reported after a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub chunks: u64,
    pub bytes: u64,
}

/// Read the first message of a call.
///
/// `Ok(None)` means the processor closed the stream without sending anything.
pub async fn probe<S>(stream: &mut S) -> Result<Option<AudioChunk>, RelayError>
where
    S: Stream<Item = Result<AudioChunk, Status>> + Unpin,
{
    match stream.next().await {
        Some(Ok(chunk)) => {
            if chunk.sequence_number != 0 {
                return Err(RelayError::Protocol(format!(
                    "first chunk has sequence number {}",
                    chunk.sequence_number
                )));
            }
            Ok(Some(chunk))
        }
        Some(Err(status)) => Err(classify(&status)),
        None => Ok(None),
    }
}

/// Records an interruption if the producer is torn down before finishing.
struct ProducerGuard {
    outcome: Arc<OutcomeCell>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        if self.outcome.set(Outcome::Failure("producer interrupted".into())) {
            tracing::debug!("Relay producer stopped before the stream ended");
        }
    }
}

async fn produce<S>(
    mut stream: S,
    tx: mpsc::Sender<Frame>,
    outcome: Arc<OutcomeCell>,
    _call: Option<CallGuard>,
) where
    S: Stream<Item = Result<AudioChunk, Status>> + Send + Unpin + 'static,
{
    let _guard = ProducerGuard {
        outcome: Arc::clone(&outcome),
    };
    let mut expected = 1;

    let result = loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                if chunk.sequence_number != expected {
                    break Err(RelayError::Protocol(format!(
                        "expected chunk {} but received {}",
                        expected, chunk.sequence_number
                    )));
                }
                expected += 1;
                metrics::record_chunk(chunk.data.len());
                if tx.send(Frame::Chunk(chunk.data)).await.is_err() {
                    break Err(RelayError::Transport {
                        code: Code::Cancelled,
                        message: "client stopped reading".into(),
                    });
                }
            }
            Some(Err(status)) => break Err(classify(&status)),
            None => break Ok(()),
        }
    };

    match result {
        Ok(()) => {
            outcome.set(Outcome::Success);
            tracing::debug!(chunks = expected, "Processor stream completed");
        }
        Err(err) => {
            tracing::warn!(error = %err, kind = err.kind(), "Processor stream failed mid-flight");
            outcome.fail(err);
        }
    }
    // Receiver may already be gone; the outcome is recorded either way.
    let _ = tx.send(Frame::End).await;
}

/// Wait for the producer's verdict within the completion ceiling.
async fn settle(outcome: &OutcomeCell, limit: Duration) -> Outcome {
    if let Some(recorded) = outcome.get() {
        return recorded.clone();
    }
    match outcome.wait_for(limit).await {
        Some(recorded) => recorded,
        None => {
            outcome.fail(RelayError::Timeout {
                stage: Stage::Completion,
                after: limit,
            });
            tracing::warn!(after = ?limit, "Processor stream did not report completion in time");
            outcome.get().cloned().unwrap_or(Outcome::Timeout)
        }
    }
}

/// A relay that has passed its probe read and is ready to be drained.
pub struct RelaySession {
    first: Option<Bytes>,
    queue: Option<mpsc::Receiver<Frame>>,
    outcome: Arc<OutcomeCell>,
    producer: Option<JoinHandle<()>>,
    completion_timeout: Duration,
    finished: bool,
    report: DrainReport,
}

impl RelaySession {
    /// Probe `stream` within `settings.probe_timeout` and start relaying.
    ///
    /// Fails without creating a session if the probe read fails or times out.
    pub async fn open<S>(
        mut stream: S,
        settings: SessionSettings,
        call: Option<CallGuard>,
    ) -> Result<Self, RelayError>
    where
        S: Stream<Item = Result<AudioChunk, Status>> + Send + Unpin + 'static,
    {
        let started = Instant::now();
        let probed = tokio::time::timeout(settings.probe_timeout, probe(&mut stream)).await;
        metrics::record_probe_duration(started.elapsed());

        let first = match probed {
            Err(_) => {
                return Err(RelayError::Timeout {
                    stage: Stage::Probe,
                    after: settings.probe_timeout,
                })
            }
            Ok(result) => result?,
        };
        Ok(Self::start(stream, first, settings, call))
    }

    /// Start relaying after a successful probe.
    pub fn start<S>(
        stream: S,
        first: Option<AudioChunk>,
        settings: SessionSettings,
        call: Option<CallGuard>,
    ) -> Self
    where
        S: Stream<Item = Result<AudioChunk, Status>> + Send + Unpin + 'static,
    {
        let outcome = Arc::new(OutcomeCell::new());

        let Some(first) = first else {
            outcome.set(Outcome::Success);
            return Self {
                first: None,
                queue: None,
                outcome,
                producer: None,
                completion_timeout: settings.completion_timeout,
                finished: false,
                report: DrainReport::default(),
            };
        };

        metrics::record_chunk(first.data.len());
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let producer = tokio::spawn(produce(stream, tx, Arc::clone(&outcome), call));

        Self {
            first: Some(first.data),
            queue: Some(rx),
            outcome,
            producer: Some(producer),
            completion_timeout: settings.completion_timeout,
            finished: false,
            report: DrainReport::default(),
        }
    }

    /// Shared handle to the session's outcome.
    pub fn outcome(&self) -> Arc<OutcomeCell> {
        Arc::clone(&self.outcome)
    }

    pub fn report(&self) -> DrainReport {
        self.report
    }

    /// Next non-empty chunk, in processor order.
    ///
    /// Yields `Some(Err(_))` once if the relay failed, then `None`.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, RelayError>> {
        if let Some(first) = self.first.take() {
            self.report.chunks += 1;
            if !first.is_empty() {
                self.report.bytes += first.len() as u64;
                return Some(Ok(first));
            }
        }
        if self.finished {
            return None;
        }

        if let Some(queue) = self.queue.as_mut() {
            while let Some(Frame::Chunk(bytes)) = queue.recv().await {
                self.report.chunks += 1;
                if bytes.is_empty() {
                    continue;
                }
                self.report.bytes += bytes.len() as u64;
                return Some(Ok(bytes));
            }
        }

        self.finished = true;
        let outcome = settle(&self.outcome, self.completion_timeout).await;
        self.outcome.terminal_error(&outcome).map(Err)
    }

    /// Copy every chunk to `sink` in order, then flush it.
    pub async fn drain<W>(mut self, sink: &mut W) -> Result<DrainReport, RelayError>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(chunk) = self.next_chunk().await {
            let bytes = chunk?;
            if let Err(e) = sink.write_all(&bytes).await {
                return Err(self.sink_closed(e));
            }
        }
        if let Err(e) = sink.flush().await {
            return Err(self.sink_closed(e));
        }
        Ok(self.report)
    }

    fn sink_closed(&self, e: std::io::Error) -> RelayError {
        let err = RelayError::Transport {
            code: Code::Cancelled,
            message: format!("client sink closed: {}", e),
        };
        self.outcome.fail(err.clone());
        err
    }

    /// Turn the session into a byte stream suitable for a response body.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
        futures_util::stream::unfold(self, |mut session| async move {
            session.next_chunk().await.map(|item| (item, session))
        })
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            if !producer.is_finished() {
                producer.abort();
            }
        }
        if self.outcome.set(Outcome::Failure("relay cancelled by client".into())) {
            tracing::debug!(
                chunks = self.report.chunks,
                bytes = self.report.bytes,
                "Relay session dropped before completion"
            );
        }
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("finished", &self.finished)
            .field("report", &self.report)
            .field("outcome", &self.outcome.get())
            .finish()
    }
}
