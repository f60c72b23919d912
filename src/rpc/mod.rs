//! Processor RPC subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     ProcessorConfig → tls.rs (load CA / identity) → channel.rs (lazy Channel)
//!
//! Per call:
//!     channel.rs (track_call) → inflight.rs (CallGuard) → generated client stub
//!
//! Shutdown:
//!     channel.rs (close) → inflight.rs (refuse new, wait for drain)
//! ```
//!
//! # Design Decisions
//! - One channel per process; HTTP/2 multiplexes concurrent calls over it
//! - The channel connects lazily so the relay can start before the processor
//! - Plaintext is allowed but logged as a warning

pub mod channel;
pub mod inflight;
pub mod tls;

/// Generated messages and stubs for the audio processor service.
pub mod pb {
    tonic::include_proto!("soundboard");
}

pub use channel::{ChannelError, ProcessorChannel};
pub use inflight::{CallGuard, InflightCalls};
