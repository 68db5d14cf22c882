//! Route lookup and target construction.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for request
//! - Build the absolute upstream URI for a matched request
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan, highest priority first, ties keep config order
//! - No match means "handle locally", never a default upstream

use std::cmp::Reverse;

use axum::http::request::Parts;
use thiserror::Error;
use url::Url;

use crate::config::{QueryMode, RouteConfig};
use crate::proxy::Predicate;
use crate::routing::matcher::{HostMatcher, Matcher, PathPrefixMatcher};

/// Route whose upstream could not be compiled.
#[derive(Debug, Error)]
#[error("route {name:?} has an invalid upstream")]
pub struct RouteError {
    pub name: String,
    #[source]
    pub source: url::ParseError,
}

/// A compiled proxy route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    host: Option<HostMatcher>,
    prefix: PathPrefixMatcher,
    upstream: Url,
    strip_prefix: bool,
    query: QueryMode,
    priority: u32,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouteError> {
        let upstream = Url::parse(&config.upstream).map_err(|source| RouteError {
            name: config.name.clone(),
            source,
        })?;

        Ok(Self {
            name: config.name.clone(),
            host: config.host.as_deref().map(HostMatcher::new),
            prefix: PathPrefixMatcher::new(config.path_prefix.clone()),
            upstream,
            strip_prefix: config.strip_prefix,
            query: config.query,
            priority: config.priority,
        })
    }

    pub fn matches(&self, req: &Parts) -> bool {
        self.prefix.matches(req) && self.host.as_ref().map_or(true, |h| h.matches(req))
    }

    /// Absolute upstream URI for a request this route matched.
    pub fn target_for(&self, req: &Parts) -> String {
        let path = req.uri.path();
        let rest = if self.strip_prefix {
            path.strip_prefix(self.prefix.prefix()).unwrap_or(path)
        } else {
            path
        };

        let mut url = self.upstream.clone();
        let rest = rest.trim_start_matches('/');
        // the bare prefix maps onto the upstream base path itself
        if !rest.is_empty() {
            url.set_path(&format!("{}/{}", self.upstream.path().trim_end_matches('/'), rest));
        }

        let inbound = req.uri.query();
        let query = match (self.query, self.upstream.query(), inbound) {
            (QueryMode::Merge, Some(base), Some(inbound)) => Some(format!("{}&{}", base, inbound)),
            (_, base, inbound) => base.or(inbound).map(str::to_owned),
        };
        url.set_query(query.as_deref());

        url.into()
    }
}

/// Ordered set of routes used as the proxy predicate.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut routes = routes
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        routes.sort_by_key(|r| Reverse(r.priority));
        Ok(Self { routes })
    }

    /// First route, by priority, matching the request.
    pub fn match_request(&self, req: &Parts) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(req))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Predicate for RouteTable {
    fn target(&self, request: &Parts) -> Option<String> {
        let route = self.match_request(request)?;
        let target = route.target_for(request);
        tracing::debug!(route = %route.name, target_uri = %target, "Route matched");
        Some(target)
    }
}
