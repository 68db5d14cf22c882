//! Proxy dispatch in front of the local application.
//!
//! # Data Flow
//! ```text
//! Request
//!     → predicate(request) ── target ──────────────────────────▶ ProxyClient::execute
//!     └─ none → local app → response
//!                  ├─ no X-Accel-Redirect → response (untouched)
//!                  └─ X-Accel-Redirect: /path
//!                         → predicate(request with /path) ── target ──▶ ProxyClient::execute
//!                         └─ none → RoutingFault
//! ```
//!
//! # Design Decisions
//! - The predicate runs at most twice per request
//! - Redirect detection ignores the local response status
//! - The redirected request keeps method and headers but has an empty body,
//!   the local application already consumed the original one; its
//!   Content-Length and Content-Type are dropped with it
//! - Proxy failures are logged once to the error log and surface as
//!   `DispatchError::Proxy`, never as `DispatchError::App`

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, request::Parts, uri::PathAndQuery, HeaderName, Request, Response, Uri};
use tower::{Layer, Service};

use crate::proxy::error::{DispatchError, RoutingFault};
use crate::proxy::error_log::{report, SharedErrorLog};
use crate::proxy::executor::{ClientOptions, ProxyClient};

/// Response header through which the local application asks for an internal redirect.
pub static X_ACCEL_REDIRECT: HeaderName = HeaderName::from_static("x-accel-redirect");

/// Decides whether a request is proxied, and where to.
///
/// Returns an absolute URI (query included) or `None` to let the local
/// application handle the request. May be called twice for one request.
pub trait Predicate: Send + Sync + 'static {
    fn target(&self, request: &Parts) -> Option<String>;
}

impl<F> Predicate for F
where
    F: Fn(&Parts) -> Option<String> + Send + Sync + 'static,
{
    fn target(&self, request: &Parts) -> Option<String> {
        self(request)
    }
}

/// Chooses between local handling and proxying for each request.
pub struct Dispatcher {
    predicate: Box<dyn Predicate>,
    client: ProxyClient,
    error_log: SharedErrorLog,
}

impl Dispatcher {
    /// Create a dispatcher; `error_log` receives every proxy failure.
    pub fn new(
        predicate: impl Predicate,
        options: ClientOptions,
        error_log: SharedErrorLog,
    ) -> std::io::Result<Self> {
        let client = ProxyClient::new(options, error_log.clone())?;
        Ok(Self {
            predicate: Box::new(predicate),
            client,
            error_log,
        })
    }

    /// Handle one request, calling `local` when it is not proxied.
    pub async fn dispatch<F, Fut, E>(&self, request: Request<Body>, local: F) -> Result<Response<Body>, DispatchError<E>>
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Result<Response<Body>, E>>,
    {
        let (parts, body) = request.into_parts();

        if let Some(target) = self.predicate.target(&parts) {
            tracing::debug!(path = %parts.uri.path(), target_uri = %target, "Predicate matched, proxying");
            return self.proxy(Request::from_parts(parts, body), &target).await;
        }

        let head = clone_head(&parts);
        let response = local(Request::from_parts(parts, body))
            .await
            .map_err(DispatchError::App)?;

        let Some(redirect) = response.headers().get(&X_ACCEL_REDIRECT) else {
            return Ok(response);
        };
        let path = String::from_utf8_lossy(redirect.as_bytes()).into_owned();
        drop(response);

        let rerouted = redirect_head(head, &path)
            .and_then(|redirected| self.predicate.target(&redirected).map(|target| (redirected, target)));
        let Some((mut redirected, target)) = rerouted else {
            tracing::error!(path = %path, "Internal redirect does not map to any upstream");
            return Err(DispatchError::Routing(RoutingFault { path }));
        };

        tracing::debug!(path = %path, target_uri = %target, "Following internal redirect");
        // the body is gone, so are the headers describing it
        redirected.headers.remove(header::CONTENT_LENGTH);
        redirected.headers.remove(header::CONTENT_TYPE);
        self.proxy(Request::from_parts(redirected, Body::empty()), &target).await
    }

    async fn proxy<E>(&self, request: Request<Body>, target: &str) -> Result<Response<Body>, DispatchError<E>> {
        match self.client.execute(request, target).await {
            Ok(response) => Ok(response.map(Body::new)),
            Err(err) => {
                report(self.error_log.as_ref(), &err);
                Err(DispatchError::Proxy(err))
            }
        }
    }
}

/// Copy of the request head; extensions are not carried over.
fn clone_head(parts: &Parts) -> Parts {
    let mut request = Request::new(());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    request.into_parts().0
}

/// Request head with the path replaced by the redirect target.
///
/// The original query is kept unless the redirect carries its own.
fn redirect_head(mut head: Parts, redirect: &str) -> Option<Parts> {
    if !redirect.starts_with('/') {
        return None;
    }
    let path_and_query = match (redirect.contains('?'), head.uri.query()) {
        (false, Some(query)) => format!("{}?{}", redirect, query),
        _ => redirect.to_string(),
    };

    let mut uri_parts = head.uri.clone().into_parts();
    uri_parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    head.uri = Uri::from_parts(uri_parts).ok()?;
    Some(head)
}

/// Tower layer installing a [`Dispatcher`] in front of a local service.
#[derive(Clone)]
pub struct StreamingProxyLayer {
    dispatcher: Arc<Dispatcher>,
}

impl StreamingProxyLayer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

impl<S> Layer<S> for StreamingProxyLayer {
    type Service = StreamingProxy<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StreamingProxy {
            inner,
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// Service produced by [`StreamingProxyLayer`].
#[derive(Clone)]
pub struct StreamingProxy<S> {
    inner: S,
    dispatcher: Arc<Dispatcher>,
}

impl<S> Service<Request<Body>> for StreamingProxy<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = DispatchError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(DispatchError::App)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // the ready clone stays with `call`, the fresh clone stays in `self`
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let dispatcher = self.dispatcher.clone();

        Box::pin(async move { dispatcher.dispatch(request, move |req| inner.call(req)).await })
    }
}
