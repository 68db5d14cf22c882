//! Streaming reverse-proxy interceptor.
//!
//! A tower layer that sits in front of a local application and, per request,
//! either lets the application answer or forwards the request to an upstream
//! URI chosen by a predicate, streaming the upstream response back under
//! backpressure.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod proxy;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use proxy::{Dispatcher, Predicate, StreamingProxyLayer};
pub use routing::RouteTable;
