//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, layers)
//!     → request.rs (request ID, query parsing)
//!     → security (admission on /api/*)
//!     → stream.rs (validate, begin relay, stream body)
//!     → response.rs (busy / rate-limit / error mapping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod stream;
pub mod tls;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::AppError;
pub use server::{AppState, HttpServer};
