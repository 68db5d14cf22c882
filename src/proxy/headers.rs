//! Header policy for the proxy hop.
//!
//! # Responsibilities
//! - Classify headers as hop-by-hop or end-to-end
//! - Strip hop-by-hop headers from forwarded requests and relayed responses
//!
//! # Design Decisions
//! - Classification is by name only, case-insensitive
//! - Headers listed in a `Connection` value are treated as hop-by-hop for that message

use axum::http::header::{self, HeaderMap, HeaderName};

/// Headers that only apply to a single transport connection.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns true if the header must not be forwarded across the proxy hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Returns true if the header is end-to-end and may be forwarded.
pub fn is_forwardable(name: &str) -> bool {
    !is_hop_by_hop(name)
}

/// Remove hop-by-hop headers in place, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Copy of `headers` without hop-by-hop entries.
pub fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    strip_hop_by_hop(&mut out);
    out
}
