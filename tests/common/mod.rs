//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use streaming_proxy::config::ProxyConfig;
use streaming_proxy::proxy::{ErrorLog, Predicate, SharedErrorLog};
use streaming_proxy::HttpServer;

/// Raw request as seen by a mock upstream.
#[derive(Debug)]
pub struct CapturedRequest {
    /// Request line and headers, lowercased.
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == name).then(|| v.trim())
        })
    }
}

/// Read one HTTP/1.1 request with an optional Content-Length body.
pub async fn read_request(socket: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before request head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    CapturedRequest { head, body }
}

/// Start a backend that records each request and answers with `response`.
pub async fn start_capturing_backend(response: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let captured = read_request(&mut socket).await;
                let _ = tx.send(captured);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start a programmable backend; `script` owns each accepted connection
/// after its request has been read.
pub async fn start_scripted_backend<F, Fut>(script: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let script = Arc::new(script);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let script = script.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;
                script(socket).await;
            });
        }
    });

    addr
}

/// Start the proxy with the configured route table.
pub async fn start_proxy(config: ProxyConfig) -> SocketAddr {
    let server = HttpServer::new(config).unwrap();
    serve(server).await
}

/// Start the proxy with a custom predicate and error log.
pub async fn start_proxy_with(config: ProxyConfig, predicate: impl Predicate, log: SharedErrorLog) -> SocketAddr {
    let server = HttpServer::with_predicate(config, predicate, log).unwrap();
    serve(server).await
}

async fn serve(server: HttpServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener, std::future::pending()).await;
    });
    addr
}

/// In-memory error log and a handle to read it back.
pub fn memory_log() -> (Arc<Mutex<Vec<u8>>>, SharedErrorLog) {
    let sink = Arc::new(Mutex::new(Vec::new()));
    (sink.clone(), sink as Arc<dyn ErrorLog>)
}

pub fn log_text(sink: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(sink.lock().unwrap().clone()).unwrap()
}

/// Poll the log until `needle` shows up or the deadline passes.
pub async fn wait_for_log(sink: &Arc<Mutex<Vec<u8>>>, needle: &str) -> String {
    for _ in 0..50 {
        let text = log_text(sink);
        if text.contains(needle) {
            return text;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log_text(sink)
}

/// Client that never reuses connections and ignores system proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
