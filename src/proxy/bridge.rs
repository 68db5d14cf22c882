//! Streaming bridge between the upstream read loop and the client response.
//!
//! # Data Flow
//! ```text
//! producer task                             consumer (host server)
//!     upstream.await ──(status, headers)──▶ head slot (oneshot)
//!     body.frame()   ──chunk──▶ conduit ──▶ ProxyBody::next_chunk / poll_frame
//!     end / error    ──close──▶ conduit ──▶ None
//!                    ◀──────── cancel ───── ProxyBody::close / drop
//! ```
//!
//! # Design Decisions
//! - Bounded mpsc conduit: a full conduit parks the producer, which stops
//!   reading upstream, so a slow client throttles the upstream socket
//! - Head is published through its own slot before any chunk is sent
//! - A mid-stream failure is logged by the producer and ends the stream;
//!   the consumer never sees an error value
//! - One `CancellationToken` per exchange carries client disconnects and
//!   timeouts alike; the producer drops the upstream body when it fires

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::{response, Response};
use bytes::Bytes;
use futures_util::Stream;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::proxy::error::{BoxError, ProxyError};
use crate::proxy::error_log::{report, SharedErrorLog};

/// Default conduit capacity in chunks.
pub const DEFAULT_CAPACITY: usize = 8;

/// Settings for one bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Maximum number of unconsumed chunks held in memory.
    pub capacity: usize,
    /// Longest wait for the next upstream chunk before the exchange is cancelled.
    pub read_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Marker sent as the last conduit item when the upstream body failed.
#[derive(Debug)]
struct Truncated;

type Conduit = mpsc::Receiver<Result<Bytes, Truncated>>;

/// A running upstream exchange whose head has not been observed yet.
pub struct StreamBridge {
    target: String,
    head: oneshot::Receiver<Result<response::Parts, ProxyError>>,
    body: ProxyBody,
}

impl StreamBridge {
    /// Spawn the producer task for `upstream` and return the consumer side.
    ///
    /// `upstream` resolves once the upstream header section is received.
    pub fn start<F, B, E>(
        target: impl Into<String>,
        upstream: F,
        options: &BridgeOptions,
        error_log: SharedErrorLog,
    ) -> Self
    where
        F: Future<Output = Result<Response<B>, E>> + Send + 'static,
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let target = target.into();
        let (head_tx, head_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(options.capacity.max(1));
        let cancel = CancellationToken::new();

        let producer = Producer {
            target: target.clone(),
            chunks: chunk_tx,
            cancel: cancel.clone(),
            read_timeout: options.read_timeout,
            error_log,
        };
        let task = tokio::spawn(producer.run(upstream, head_tx));

        Self {
            target,
            head: head_rx,
            body: ProxyBody {
                conduit: chunk_rx,
                cancel,
                task: Some(task),
                finished: false,
                truncated: false,
            },
        }
    }

    /// Token that cancels the producer of this exchange.
    pub fn cancel_token(&self) -> CancellationToken {
        self.body.cancel.clone()
    }

    /// Wait for the upstream status and headers.
    ///
    /// Resolves independently of body progress. On failure the producer is
    /// cancelled when the body handle drops.
    pub async fn head(self) -> Result<(response::Parts, ProxyBody), ProxyError> {
        match self.head.await {
            Ok(Ok(parts)) => Ok((parts, self.body)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProxyError::Connect {
                target: self.target,
                source: "upstream exchange ended before response headers".into(),
            }),
        }
    }
}

struct Producer {
    target: String,
    chunks: mpsc::Sender<Result<Bytes, Truncated>>,
    cancel: CancellationToken,
    read_timeout: Duration,
    error_log: SharedErrorLog,
}

impl Producer {
    async fn run<F, B, E>(self, upstream: F, head: oneshot::Sender<Result<response::Parts, ProxyError>>)
    where
        F: Future<Output = Result<Response<B>, E>>,
        B: Body<Data = Bytes> + Unpin,
        B::Error: Into<BoxError> + Send,
        E: Into<BoxError> + Send,
    {
        let response = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!(target_uri = %self.target, "Upstream exchange cancelled before headers");
                return;
            }
            res = upstream => res,
        };

        let (parts, mut body) = match response {
            Ok(res) => res.into_parts(),
            Err(e) => {
                let _ = head.send(Err(ProxyError::Connect {
                    target: self.target,
                    source: e.into(),
                }));
                return;
            }
        };

        tracing::debug!(target_uri = %self.target, status = %parts.status, "Upstream headers received");
        if head.send(Ok(parts)).is_err() {
            return;
        }

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(target_uri = %self.target, "Consumer closed, releasing upstream");
                    return;
                }
                frame = tokio::time::timeout(self.read_timeout, body.frame()) => frame,
            };

            let data = match frame {
                Ok(None) => return,
                Ok(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) if !data.is_empty() => data,
                    // trailers and empty frames are not relayed
                    _ => continue,
                },
                Ok(Some(Err(e))) => return self.fail(e.into()).await,
                Err(_) => {
                    self.cancel.cancel();
                    let timeout = std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no upstream data within {:?}", self.read_timeout),
                    );
                    return self.fail(Box::new(timeout)).await;
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                sent = self.chunks.send(Ok(data)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Log a body-phase failure and close the conduit with the error flag.
    async fn fail(self, source: BoxError) {
        let err = ProxyError::Body {
            target: self.target,
            source,
        };
        tracing::warn!(target_uri = %err.target(), error = %err, "Upstream body truncated");
        report(self.error_log.as_ref(), &err);
        let _ = self.chunks.send(Err(Truncated)).await;
    }
}

/// Pull side of the bridge, handed to the host server as the response body.
///
/// Dropping it before the end of the stream cancels the upstream read.
pub struct ProxyBody {
    conduit: Conduit,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    finished: bool,
    truncated: bool,
}

impl ProxyBody {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.conduit.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(chunk)),
            Poll::Ready(Some(Err(Truncated))) => {
                self.truncated = true;
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }

    /// Next chunk in upstream order, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        std::future::poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Stop streaming. Before end of stream this aborts the upstream read.
    pub fn close(&mut self) {
        if !self.finished {
            self.cancel.cancel();
            self.finished = true;
        }
        self.conduit.close();
    }

    /// True once the stream ended because the upstream body failed.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Wait for the producer task to exit.
    pub async fn join_producer(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for ProxyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyBody")
            .field("finished", &self.finished)
            .field("truncated", &self.truncated)
            .finish()
    }
}

impl Drop for ProxyBody {
    fn drop(&mut self) {
        self.close();
    }
}

impl Body for ProxyBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut()
            .poll_chunk(cx)
            .map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

impl Stream for ProxyBody {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().poll_chunk(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::error_log::ErrorLog;
    use axum::http::StatusCode;
    use futures_util::{stream, StreamExt};
    use http_body_util::{Empty, StreamBody};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn memory_log() -> (Arc<Mutex<Vec<u8>>>, SharedErrorLog) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        (sink.clone(), sink as Arc<dyn ErrorLog>)
    }

    fn log_text(sink: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(sink.lock().unwrap().clone()).unwrap()
    }

    fn options(capacity: usize) -> BridgeOptions {
        BridgeOptions {
            capacity,
            read_timeout: Duration::from_secs(5),
        }
    }

    type Chunks = Vec<Result<Frame<Bytes>, std::io::Error>>;

    fn chunked_response(chunks: Chunks) -> Response<StreamBody<stream::Iter<std::vec::IntoIter<Result<Frame<Bytes>, std::io::Error>>>>> {
        Response::builder()
            .status(StatusCode::CREATED)
            .header("x-upstream", "yes")
            .body(StreamBody::new(stream::iter(chunks)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_head_available_for_empty_body() {
        let (_sink, log) = memory_log();
        let upstream = async {
            Ok::<_, std::io::Error>(Response::builder().status(204).body(Empty::<Bytes>::new()).unwrap())
        };
        let bridge = StreamBridge::start("http://up/empty", upstream, &options(4), log);

        let (head, mut body) = bridge.head().await.unwrap();
        assert_eq!(head.status, StatusCode::NO_CONTENT);
        assert_eq!(body.next_chunk().await, None);
        assert!(!body.is_truncated());
    }

    #[tokio::test]
    async fn test_head_before_body_larger_than_capacity() {
        let (_sink, log) = memory_log();
        let chunks: Chunks = (0..32)
            .map(|i| Ok(Frame::data(Bytes::from(format!("chunk-{i};")))))
            .collect();
        let bridge = StreamBridge::start("http://up/big", async move { Ok::<_, std::io::Error>(chunked_response(chunks)) }, &options(2), log);

        let (head, mut body) = bridge.head().await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(head.headers.get("x-upstream").unwrap(), "yes");

        let mut received = Vec::new();
        while let Some(chunk) = body.next_chunk().await {
            received.push(chunk);
        }
        assert_eq!(received.len(), 32);
        assert_eq!(received[0], Bytes::from("chunk-0;"));
        assert_eq!(received[31], Bytes::from("chunk-31;"));
    }

    #[tokio::test]
    async fn test_truncated_upstream_yields_received_chunks_then_ends() {
        let (sink, log) = memory_log();
        let chunks: Chunks = vec![
            Ok(Frame::data(Bytes::from_static(b"one"))),
            Ok(Frame::data(Bytes::from_static(b"two"))),
            Ok(Frame::data(Bytes::from_static(b"three"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")),
        ];
        let bridge = StreamBridge::start("http://up/partial", async move { Ok::<_, std::io::Error>(chunked_response(chunks)) }, &options(4), log);

        let (head, mut body) = bridge.head().await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);

        let mut received = Vec::new();
        while let Some(chunk) = body.next_chunk().await {
            received.push(chunk);
        }
        assert_eq!(received, vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]);
        assert!(body.is_truncated());

        body.join_producer().await;
        let text = log_text(&sink);
        assert_eq!(text.matches("Proxy error when proxying to http://up/partial: body phase").count(), 1);
        assert!(text.contains("\tconnection reset"));
    }

    #[tokio::test]
    async fn test_slow_consumer_bounds_buffered_chunks() {
        let (_sink, log) = memory_log();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let infinite = stream::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Frame::data(Bytes::from_static(b"data")))
        });
        let upstream = async move { Ok::<_, std::io::Error>(Response::new(StreamBody::new(infinite))) };
        let capacity = 4;
        let bridge = StreamBridge::start("http://up/infinite", upstream, &options(capacity), log);

        let (_head, mut body) = bridge.head().await.unwrap();
        for _ in 0..3 {
            assert!(body.next_chunk().await.is_some());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // consumed + conduit capacity + the chunk parked in a pending send
        let upper = 3 + capacity + 1;
        assert!(produced.load(Ordering::SeqCst) <= upper, "produced {}", produced.load(Ordering::SeqCst));

        body.close();
        body.join_producer().await;
        let after_close = produced.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(produced.load(Ordering::SeqCst), after_close);
    }

    #[tokio::test]
    async fn test_close_before_headers_cancels_producer() {
        let (_sink, log) = memory_log();
        let upstream = std::future::pending::<Result<Response<Empty<Bytes>>, std::io::Error>>();
        let bridge = StreamBridge::start("http://up/hang", upstream, &options(4), log);
        let token = bridge.cancel_token();

        let waited = tokio::time::timeout(Duration::from_millis(50), bridge.head()).await;
        assert!(waited.is_err());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_upstream_failure_before_headers_is_header_phase() {
        let (sink, log) = memory_log();
        let upstream = async {
            Err::<Response<Empty<Bytes>>, _>(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
        };
        let bridge = StreamBridge::start("http://up/down", upstream, &options(4), log);

        let err = bridge.head().await.err().unwrap();
        assert!(matches!(err, ProxyError::Connect { .. }));
        assert_eq!(err.phase(), crate::proxy::Phase::Header);
        // reporting header-phase errors is the dispatcher's job
        assert!(log_text(&sink).is_empty());
    }

    #[tokio::test]
    async fn test_read_timeout_truncates_stream() {
        let (sink, log) = memory_log();
        let stalled = stream::iter(vec![Ok::<_, std::io::Error>(Frame::data(Bytes::from_static(b"first")))])
            .chain(stream::pending());
        let upstream = async move { Ok::<_, std::io::Error>(Response::new(StreamBody::new(stalled))) };
        let opts = BridgeOptions {
            capacity: 4,
            read_timeout: Duration::from_millis(50),
        };
        let bridge = StreamBridge::start("http://up/stall", upstream, &opts, log);

        let (_head, mut body) = bridge.head().await.unwrap();
        assert_eq!(body.next_chunk().await, Some(Bytes::from("first")));
        assert_eq!(body.next_chunk().await, None);
        assert!(body.is_truncated());
        assert!(log_text(&sink).contains("body phase"));
    }
}
