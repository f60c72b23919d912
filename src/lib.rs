//! Clip relay: streams processed soundboard audio from a gRPC audio
//! processor to HTTP clients.
//!
//! # Architecture Overview
//!
//! ```text
//!   HTTP client                                                  Audio processor
//!       │                                                              ▲
//!       ▼                                                              │ gRPC (HTTP/2, optional TLS)
//!  ┌─────────┐   ┌───────────┐   ┌──────────────────────────┐   ┌──────────┐
//!  │  http   │──▶│ security  │──▶│          relay           │──▶│   rpc    │
//!  │ server  │   │ admission │   │ probe → queue → drain    │   │ channel  │
//!  └─────────┘   └───────────┘   └──────────────────────────┘   └──────────┘
//!
//!  Cross-cutting: config, observability, resilience (timeouts), lifecycle
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;
pub mod resilience;
pub mod rpc;
pub mod security;

pub use config::RelayServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{Application, Shutdown};
pub use relay::{RelayError, RelaySession, StreamingRelay};
