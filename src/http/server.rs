//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the local application Router
//! - Put the streaming proxy layer in front of it
//! - Wire up middleware (tracing, request ID, request timeout)
//! - Map dispatcher errors to response statuses
//! - Bind server to listener and shut down gracefully

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::local::local_app;
use crate::proxy::{
    ClientOptions, DispatchError, Dispatcher, Predicate, ProxyError, SharedErrorLog, StreamingProxyLayer,
    TracingErrorLog,
};
use crate::routing::{RouteError, RouteTable};

/// Failure to assemble the server from its configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("failed to create upstream client: {0}")]
    Client(#[from] std::io::Error),
}

/// HTTP server for the streaming proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server routing by the configured `[[routes]]`, logging
    /// proxy failures through `tracing`.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let routes = RouteTable::from_config(&config.routes)?;
        tracing::info!(routes = routes.len(), "Route table compiled");
        Self::with_predicate(config, routes, Arc::new(TracingErrorLog))
    }

    /// Create a server with a custom predicate and error log.
    pub fn with_predicate(
        config: ProxyConfig,
        predicate: impl Predicate,
        error_log: SharedErrorLog,
    ) -> Result<Self, ServerError> {
        let dispatcher = Dispatcher::new(predicate, ClientOptions::from(&config), error_log)?;
        let router = Self::build_router(&config, dispatcher);
        Ok(Self { router })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, dispatcher: Dispatcher) -> Router {
        let proxied = ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_dispatch_error))
            .layer(StreamingProxyLayer::new(dispatcher))
            .service(local_app(&config.redirects));

        Router::new()
            .fallback_service(proxied)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Router with all layers, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Turn a dispatcher failure into the response sent to the client.
///
/// Body-phase failures never get here; the response is already streaming.
async fn handle_dispatch_error(err: DispatchError<Infallible>) -> Response {
    match err {
        DispatchError::Proxy(ProxyError::HeaderTimeout { .. }) => {
            (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out").into_response()
        }
        DispatchError::Proxy(_) => (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response(),
        DispatchError::Routing(fault) => {
            tracing::error!(error = %fault, "Routing fault");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal redirect is not routable").into_response()
        }
        DispatchError::App(never) => match never {},
    }
}
