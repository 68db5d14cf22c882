//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, request timeout)
//!     → StreamingProxyLayer (proxy or local)
//!     → local.rs (health, internal redirects, 404)
//!     → Response (local body or streaming upstream body)
//! ```

pub mod local;
pub mod server;

pub use local::local_app;
pub use server::{HttpServer, ServerError};
