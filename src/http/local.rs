//! Local application served behind the proxy layer.
//!
//! # Responsibilities
//! - Answer `/healthz`
//! - Answer configured paths with an `X-Accel-Redirect` internal redirect
//! - Return 404 for everything else
//!
//! # Design Decisions
//! - Redirect responses carry an empty body; the proxy layer discards them

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{any, get},
    Router,
};

use std::collections::HashSet;

use crate::config::validation::is_literal_path;
use crate::config::RedirectConfig;
use crate::proxy::X_ACCEL_REDIRECT;

/// Build the local application router.
pub fn local_app(redirects: &[RedirectConfig]) -> Router {
    let mut router = Router::new().route("/healthz", get(|| async { "ok" }));
    let mut seen = HashSet::from(["/healthz"]);

    for redirect in redirects {
        // axum panics on captures and on a path registered twice
        if !is_literal_path(&redirect.path) || !seen.insert(redirect.path.as_str()) {
            tracing::warn!(path = %redirect.path, "Skipping unroutable redirect path");
            continue;
        }
        let target = redirect.target.clone();
        router = router.route(
            &redirect.path,
            any(move || {
                let target = target.clone();
                async move { [(X_ACCEL_REDIRECT.clone(), target)].into_response() }
            }),
        );
    }

    router.fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
}
