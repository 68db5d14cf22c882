//! Streaming proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → dispatcher.rs (predicate decides: local app or upstream)
//!     → request.rs (upstream request: method, end-to-end headers, body moved)
//!     → bridge.rs (producer task reads upstream into a bounded conduit)
//!     → executor.rs (waits for upstream head, returns status + headers + body)
//!     → Response streamed to the client as the conduit drains
//! ```
//!
//! # Design Decisions
//! - One extra task per proxied request, never a pool
//! - Memory per exchange is bounded by the conduit capacity
//! - Errors are tagged header-phase or body-phase; only header-phase errors
//!   can still become an error status

pub mod bridge;
pub mod dispatcher;
pub mod error;
pub mod error_log;
pub mod executor;
pub mod headers;
pub mod request;

pub use bridge::{BridgeOptions, ProxyBody, StreamBridge};
pub use dispatcher::{Dispatcher, Predicate, StreamingProxy, StreamingProxyLayer, X_ACCEL_REDIRECT};
pub use error::{DispatchError, Phase, ProxyError, RoutingFault};
pub use error_log::{ErrorLog, SharedErrorLog, TracingErrorLog};
pub use executor::{ClientOptions, ProxyClient};
