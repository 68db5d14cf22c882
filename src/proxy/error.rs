//! Proxy error taxonomy.
//!
//! Every failure of a proxied exchange carries the phase it happened in. A
//! header-phase failure can still be reported to the client as a status code;
//! a body-phase failure happens after the status was committed and can only
//! end the stream.

use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for upstream transport causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Portion of the proxied exchange in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before upstream status and headers were received.
    Header,
    /// While the response body was streaming.
    Body,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Header => write!(f, "header"),
            Phase::Body => write!(f, "body"),
        }
    }
}

/// Failure of a single proxied exchange.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Target could not be parsed as an absolute URI. No connection was attempted.
    #[error("invalid upstream uri {target:?}: {reason}")]
    Build { target: String, reason: String },

    /// Upstream unreachable or sent a malformed response head.
    #[error("upstream {target} failed before response headers")]
    Connect {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Upstream did not deliver response headers in time.
    #[error("upstream {target} sent no response headers within {timeout:?}")]
    HeaderTimeout { target: String, timeout: Duration },

    /// Upstream connection failed after the response was committed.
    #[error("upstream {target} failed mid-stream")]
    Body {
        target: String,
        #[source]
        source: BoxError,
    },
}

impl ProxyError {
    /// Phase the failure belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            ProxyError::Build { .. }
            | ProxyError::Connect { .. }
            | ProxyError::HeaderTimeout { .. } => Phase::Header,
            ProxyError::Body { .. } => Phase::Body,
        }
    }

    /// Target URI of the failed exchange, as given by the predicate.
    pub fn target(&self) -> &str {
        match self {
            ProxyError::Build { target, .. }
            | ProxyError::Connect { target, .. }
            | ProxyError::HeaderTimeout { target, .. }
            | ProxyError::Body { target, .. } => target,
        }
    }
}

/// Internal redirect named a path that no proxy target matches.
#[derive(Debug, Error)]
#[error("could not proxy {path}: path does not map to any uri")]
pub struct RoutingFault {
    pub path: String,
}

/// Error returned by the dispatcher service.
///
/// Keeps local application failures apart from proxy failures so the host
/// server can tell "my app failed" from "my proxy failed".
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    #[error("local application error: {0}")]
    App(E),
    #[error("proxy error: {0}")]
    Proxy(#[source] ProxyError),
    #[error(transparent)]
    Routing(RoutingFault),
}

impl<E> DispatchError<E> {
    pub fn is_proxy(&self) -> bool {
        matches!(self, DispatchError::Proxy(_))
    }
}
