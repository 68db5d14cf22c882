//! Upstream request construction.
//!
//! # Responsibilities
//! - Parse and check the target URI produced by the predicate
//! - Carry method and body over from the inbound request unchanged
//! - Forward end-to-end headers, rewrite Host for the target
//!
//! # Design Decisions
//! - The body is moved, never buffered or copied
//! - The target URI is used verbatim; the inbound query is not merged in
//! - Content-Length passes through since the body is not re-chunked
//! - Always HTTP/1.1 towards upstream, whatever the inbound version was

use axum::body::Body;
use axum::http::{header, uri::Scheme, HeaderValue, Request, Uri};

use crate::proxy::error::ProxyError;
use crate::proxy::headers::forwardable;

/// Parse a predicate target into an absolute `http`/`https` URI.
pub fn parse_target(target: &str) -> Result<Uri, ProxyError> {
    let build_err = |reason: String| ProxyError::Build {
        target: target.to_string(),
        reason,
    };

    let uri: Uri = target.parse().map_err(|e: axum::http::uri::InvalidUri| build_err(e.to_string()))?;

    match uri.scheme() {
        Some(s) if *s == Scheme::HTTP || *s == Scheme::HTTPS => {}
        Some(s) => return Err(build_err(format!("unsupported scheme {}", s))),
        None => return Err(build_err("not an absolute uri".to_string())),
    }
    if uri.host().is_none() {
        return Err(build_err("missing host".to_string()));
    }

    Ok(uri)
}

/// `host[:port]` of the target, without any userinfo.
fn host_header(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    Some(match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Build the outbound request for `target` from the inbound request.
pub fn build_upstream_request(inbound: Request<Body>, target: &str) -> Result<Request<Body>, ProxyError> {
    let uri = parse_target(target)?;
    let host = host_header(&uri)
        .and_then(|h| HeaderValue::from_str(&h).ok())
        .ok_or_else(|| ProxyError::Build {
            target: target.to_string(),
            reason: "invalid host".to_string(),
        })?;

    let (parts, body) = inbound.into_parts();
    let mut headers = forwardable(&parts.headers);
    headers.insert(header::HOST, host);

    let mut req = Request::new(body);
    *req.method_mut() = parts.method;
    *req.uri_mut() = uri;
    *req.headers_mut() = headers;
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use http_body_util::BodyExt;

    fn inbound(method: Method, uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "proxy.local")
            .header("connection", "keep-alive")
            .header("keep-alive", "timeout=5")
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .header("x-custom", "one")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_method_headers_and_body_preserved() {
        let req = inbound(Method::PUT, "/search?q=inbound", r#"{"a":1}"#);
        let out = build_upstream_request(req, "http://search.internal:9000/find?q=target").unwrap();

        assert_eq!(out.method(), Method::PUT);
        assert_eq!(out.uri().to_string(), "http://search.internal:9000/find?q=target");
        assert_eq!(out.headers().get("host").unwrap(), "search.internal:9000");
        assert_eq!(out.headers().get("content-type").unwrap(), "application/json");
        assert_eq!(out.headers().get("content-length").unwrap(), "7");
        assert_eq!(out.headers().get("x-custom").unwrap(), "one");
        assert!(out.headers().get("connection").is_none());
        assert!(out.headers().get("keep-alive").is_none());

        let body = out.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"a":1}"#);
    }

    #[test]
    fn test_host_without_default_port_and_userinfo() {
        let req = inbound(Method::GET, "/", "");
        let out = build_upstream_request(req, "https://user:pw@upstream/reports").unwrap();
        assert_eq!(out.headers().get("host").unwrap(), "upstream");
    }

    #[test]
    fn test_invalid_targets_are_build_errors() {
        for target in ["not a uri", "/relative/path", "ftp://files/x", ""] {
            let req = inbound(Method::GET, "/", "");
            let err = build_upstream_request(req, target).unwrap_err();
            assert!(matches!(err, ProxyError::Build { .. }), "{target}: {err}");
            assert_eq!(err.target(), target);
        }
    }
}
