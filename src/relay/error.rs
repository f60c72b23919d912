//! Relay error taxonomy and the busy/overload contract.
//!
//! The processor sheds load by failing a call with `RESOURCE_EXHAUSTED`.
//! That code, and only that code, becomes [`RelayError::Busy`].

use std::time::Duration;

use tonic::{Code, Status};

/// Where a relay bound was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probe,
    Completion,
    Call,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Probe => write!(f, "probe read"),
            Stage::Completion => write!(f, "stream completion"),
            Stage::Call => write!(f, "processor call"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    /// The processor deliberately rejected the call because it is at capacity.
    #[error("audio processor is busy: {0}")]
    Busy(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// Channel or network level problem.
    #[error("transport failure ({code:?}): {message}")]
    Transport { code: Code, message: String },

    /// Malformed or unexpected response from the processor.
    #[error("protocol failure: {0}")]
    Protocol(String),
}

impl RelayError {
    pub fn is_busy(&self) -> bool {
        matches!(self, RelayError::Busy(_))
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Busy(_) => "busy",
            RelayError::Timeout { .. } => "timeout",
            RelayError::Transport { .. } => "transport",
            RelayError::Protocol(_) => "protocol",
        }
    }
}

/// Map an RPC status onto the relay taxonomy.
pub fn classify(status: &Status) -> RelayError {
    match status.code() {
        Code::ResourceExhausted => RelayError::Busy(status.message().to_string()),
        Code::DeadlineExceeded => RelayError::Timeout {
            stage: Stage::Call,
            after: Duration::ZERO,
        },
        code @ (Code::Unavailable | Code::Cancelled | Code::Aborted | Code::Unknown) => {
            RelayError::Transport {
                code,
                message: status.message().to_string(),
            }
        }
        code => RelayError::Protocol(format!("{:?}: {}", code, status.message())),
    }
}

impl From<Status> for RelayError {
    fn from(status: Status) -> Self {
        classify(&status)
    }
}
