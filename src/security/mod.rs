//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming /api request:
//!     → headers.rs (derive client key: X-Forwarded-For, X-Real-IP, peer)
//!     → rate_limit.rs (token bucket, per key or global)
//!     → admitted: handler runs, X-RateLimit-* attached to the response
//!     → denied: 429 with Retry-After, handler never runs
//! ```
//!
//! # Design Decisions
//! - Admission is checked before any processor call is made
//! - The limiter never blocks; denial is an ordinary return value

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{admission_middleware, Admission, AdmissionLimiter};

/// Select ring as the process-wide rustls provider. Later calls are no-ops.
///
/// Both TLS stacks in the process (listener and processor channel) share it.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
