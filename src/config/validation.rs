//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, conduit capacity)
//! - Check upstreams are absolute http(s) URIs
//! - Detect duplicate route names and redirect paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// Largest accepted conduit capacity, in chunks.
pub const MAX_BRIDGE_CAPACITY: usize = 1024;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),
    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("bridge.capacity must be between 1 and 1024, got {0}")]
    BridgeCapacity(usize),
    #[error("duplicate route name {0:?}")]
    DuplicateRoute(String),
    #[error("route {route:?}: path_prefix {prefix:?} must start with '/'")]
    PathPrefix { route: String, prefix: String },
    #[error("route {route:?}: upstream {upstream:?} is not an absolute http(s) uri")]
    Upstream { route: String, upstream: String },
    #[error("redirect path {0:?} must be a unique literal path starting with '/'")]
    RedirectPath(String),
    #[error("redirect target {0:?} must start with '/'")]
    RedirectTarget(String),
}

/// True if `path` is a literal route path the local router accepts.
///
/// Captures (`:id`, `*rest`, `{id}`) are rejected; redirect routes match
/// exact paths only.
pub fn is_literal_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.contains(['{', '}'])
        && path.split('/').all(|segment| !segment.starts_with([':', '*']))
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let timeouts = [
        ("request_secs", config.timeouts.request_secs),
        ("connect_secs", config.timeouts.connect_secs),
        ("read_secs", config.timeouts.read_secs),
    ];
    for (name, secs) in timeouts {
        if secs == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if !(1..=MAX_BRIDGE_CAPACITY).contains(&config.bridge.capacity) {
        errors.push(ValidationError::BridgeCapacity(config.bridge.capacity));
    }

    let mut names = HashSet::new();
    for route in &config.routes {
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::PathPrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        let upstream_ok = Url::parse(&route.upstream)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .unwrap_or(false);
        if !upstream_ok {
            errors.push(ValidationError::Upstream {
                route: route.name.clone(),
                upstream: route.upstream.clone(),
            });
        }
    }

    // "/healthz" is served by the local application itself
    let mut paths = HashSet::from(["/healthz"]);
    for redirect in &config.redirects {
        if !is_literal_path(&redirect.path) || !paths.insert(redirect.path.as_str()) {
            errors.push(ValidationError::RedirectPath(redirect.path.clone()));
        }
        if !redirect.target.starts_with('/') {
            errors.push(ValidationError::RedirectTarget(redirect.target.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
