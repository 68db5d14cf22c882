//! Proxy request execution.
//!
//! # Responsibilities
//! - Build the upstream request from the inbound one
//! - Start the streaming bridge and wait for the upstream head
//! - Enforce the header-phase deadline by cancelling the bridge
//! - Relay status and end-to-end headers with the streaming body
//!
//! # Design Decisions
//! - Everything before the head is returned is a header-phase error
//! - Nothing after it can change the status; the body just ends early
//! - No retries and no pooling policy beyond the client's defaults

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::ProxyConfig;
use crate::proxy::bridge::{BridgeOptions, ProxyBody, StreamBridge};
use crate::proxy::error::ProxyError;
use crate::proxy::error_log::SharedErrorLog;
use crate::proxy::headers::strip_hop_by_hop;
use crate::proxy::request::build_upstream_request;

/// HTTP client used for upstream calls.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Settings for upstream exchanges.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for the upstream head (connect + response headers).
    pub connect_timeout: Duration,
    pub bridge: BridgeOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            bridge: BridgeOptions::default(),
        }
    }
}

impl From<&ProxyConfig> for ClientOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            bridge: BridgeOptions {
                capacity: config.bridge.capacity,
                read_timeout: Duration::from_secs(config.timeouts.read_secs),
            },
        }
    }
}

/// Executes proxied exchanges against arbitrary upstream URIs.
#[derive(Clone)]
pub struct ProxyClient {
    client: UpstreamClient,
    options: ClientOptions,
    error_log: SharedErrorLog,
}

impl ProxyClient {
    /// Create a client for `http` and `https` upstreams.
    ///
    /// Falls back to an empty trust store when no native roots are found, in
    /// which case only plain `http` upstreams are usable.
    pub fn new(options: ClientOptions, error_log: SharedErrorLog) -> std::io::Result<Self> {
        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "No native root certificates, https upstreams will fail");
                let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
                    rustls::crypto::ring::default_provider(),
                ))
                .with_safe_default_protocol_versions()
                .map_err(std::io::Error::other)?
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
                HttpsConnectorBuilder::new().with_tls_config(tls)
            }
        };
        let connector = builder.https_or_http().enable_http1().build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            options,
            error_log,
        })
    }

    /// Forward `inbound` to `target` and return the upstream response.
    ///
    /// The returned body streams from upstream; a failure while it streams
    /// ends it early and goes to the error log.
    pub async fn execute(&self, inbound: Request<Body>, target: &str) -> Result<Response<ProxyBody>, ProxyError> {
        let request = build_upstream_request(inbound, target)?;

        tracing::debug!(
            method = %request.method(),
            target_uri = %target,
            "Forwarding to upstream"
        );

        let bridge = StreamBridge::start(
            target,
            self.client.request(request),
            &self.options.bridge,
            self.error_log.clone(),
        );
        let cancel = bridge.cancel_token();

        let (mut head, body) = match tokio::time::timeout(self.options.connect_timeout, bridge.head()).await {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                return Err(ProxyError::HeaderTimeout {
                    target: target.to_string(),
                    timeout: self.options.connect_timeout,
                });
            }
        };

        strip_hop_by_hop(&mut head.headers);
        Ok(Response::from_parts(head, body))
    }
}
