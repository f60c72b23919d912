//! Streaming relay subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → stream.rs (begin_stream: open call, probe first chunk)
//!         → busy / failure: no session, handler picks the status
//!         → session.rs (RelaySession: producer task + bounded queue)
//!     → session.rs (next_chunk / drain / into_stream, in order)
//!     → outcome.rs (terminal outcome, recorded once)
//! ```
//!
//! # Design Decisions
//! - Busy is detected before any response header is committed
//! - Single attempt per request; retry belongs to the client
//! - Every exit path tears down the call (producer aborted on drop)

pub mod error;
pub mod outcome;
pub mod session;
pub mod stream;
pub mod unary;

pub use error::{classify, RelayError, Stage};
pub use outcome::{Outcome, OutcomeCell};
pub use session::{DrainReport, RelaySession, SessionSettings};
pub use stream::{RelayRequest, StreamingRelay};
pub use unary::{AudioInfo, ExtractedAudio};
