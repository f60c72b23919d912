//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to processor:
//!     → timeouts.rs (bound the call, tag the stage that expired)
//!     → On RESOURCE_EXHAUSTED: surfaced as busy, never retried here
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every processor call has a deadline
//! - No automatic retries: the client owns retry policy via Retry-After

pub mod timeouts;
