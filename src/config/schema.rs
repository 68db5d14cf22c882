//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the streaming proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Proxy routes; a request matching none is handled locally.
    pub routes: Vec<RouteConfig>,

    /// Local paths answered with an internal redirect.
    pub redirects: Vec<RedirectConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Streaming bridge settings.
    pub bridge: BridgeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// How a route combines the inbound query with the upstream's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Upstream query wins; the inbound query is used only when it has none.
    #[default]
    Replace,
    /// Upstream query followed by the inbound query.
    Merge,
}

/// Route mapping matching requests to an upstream base URI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host header to match (case-insensitive, port ignored).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    #[serde(default = "default_prefix")]
    pub path_prefix: String,

    /// Absolute upstream base URI (e.g., "http://search:9000/v2").
    pub upstream: String,

    /// Remove the matched prefix before appending the path to the upstream.
    #[serde(default)]
    pub strip_prefix: bool,

    #[serde(default)]
    pub query: QueryMode,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

fn default_prefix() -> String {
    "/".to_string()
}

/// Local path answered with `X-Accel-Redirect: <target>`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    pub path: String,
    pub target: String,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for the local server to produce response headers, in seconds.
    pub request_secs: u64,

    /// Deadline for upstream response headers, in seconds.
    pub connect_secs: u64,

    /// Longest idle gap between upstream body chunks, in seconds.
    pub read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 300,
            connect_secs: 10,
            read_secs: 60,
        }
    }
}

/// Streaming bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Conduit capacity in chunks.
    pub capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: crate::proxy::bridge::DEFAULT_CAPACITY,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
