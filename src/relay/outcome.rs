//! Terminal outcome of a relay, recorded exactly once.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::Notify;

use crate::observability::metrics;
use crate::relay::error::{RelayError, Stage};

/// How a relay ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    /// The processor shed load.
    Busy,
    Timeout,
    Failure(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Busy => "busy",
            Outcome::Timeout => "timeout",
            Outcome::Failure(_) => "failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Turn a non-success outcome back into an error for the caller.
    pub fn into_result(self) -> Result<(), RelayError> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::Busy => Err(RelayError::Busy("rejected mid-stream".into())),
            Outcome::Timeout => Err(RelayError::Timeout {
                stage: Stage::Completion,
                after: Duration::ZERO,
            }),
            Outcome::Failure(detail) => Err(RelayError::Protocol(detail)),
        }
    }
}

impl From<&RelayError> for Outcome {
    fn from(err: &RelayError) -> Self {
        match err {
            RelayError::Busy(_) => Outcome::Busy,
            RelayError::Timeout { .. } => Outcome::Timeout,
            other => Outcome::Failure(other.to_string()),
        }
    }
}

/// Set-once slot shared by a session's producer and consumer.
///
/// The first `set` wins; later attempts are ignored and reported as such.
#[derive(Debug, Default)]
pub struct OutcomeCell {
    slot: OnceLock<Outcome>,
    error: OnceLock<RelayError>,
    notify: Notify,
}

impl OutcomeCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome. Returns `false` if one was already recorded.
    pub fn set(&self, outcome: Outcome) -> bool {
        self.record(outcome, None)
    }

    /// Record a failure outcome, keeping the error that caused it.
    pub fn fail(&self, err: RelayError) -> bool {
        self.record(Outcome::from(&err), Some(err))
    }

    fn record(&self, outcome: Outcome, err: Option<RelayError>) -> bool {
        let label = outcome.label();
        let won = self.slot.set(outcome).is_ok();
        if won {
            if let Some(err) = err {
                let _ = self.error.set(err);
            }
            metrics::record_relay_outcome(label);
            self.notify.notify_waiters();
        }
        won
    }

    pub fn get(&self) -> Option<&Outcome> {
        self.slot.get()
    }

    /// The error behind a failed outcome, when one was recorded via [`fail`](Self::fail).
    pub fn error(&self) -> Option<&RelayError> {
        self.error.get()
    }

    /// Error to surface for a finished relay; `None` on success.
    pub fn terminal_error(&self, outcome: &Outcome) -> Option<RelayError> {
        if outcome.is_success() {
            return None;
        }
        self.error()
            .cloned()
            .or_else(|| outcome.clone().into_result().err())
    }

    /// Wait for the outcome to be recorded.
    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.slot.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Wait at most `limit`; `None` if nothing was recorded in time.
    pub async fn wait_for(&self, limit: Duration) -> Option<Outcome> {
        tokio::time::timeout(limit, self.wait()).await.ok()
    }
}
