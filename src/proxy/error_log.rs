//! Error side-channel for proxy failures.
//!
//! The dispatcher receives a handle at construction; instances may share one.

use std::error::Error as StdError;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::proxy::error::ProxyError;

/// Append-only text sink with an explicit flush.
pub trait ErrorLog: Send + Sync {
    /// Append one line.
    fn write_line(&self, line: &str);

    /// Flush buffered lines to the underlying sink.
    fn flush(&self);
}

/// Shared handle to an error log.
pub type SharedErrorLog = Arc<dyn ErrorLog>;

/// Writes every line as a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn write_line(&self, line: &str) {
        tracing::error!(target: "streaming_proxy::errors", "{}", line);
    }

    fn flush(&self) {}
}

impl<W: Write + Send> ErrorLog for Mutex<W> {
    fn write_line(&self, line: &str) {
        if let Ok(mut w) = self.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }

    fn flush(&self) {
        if let Ok(mut w) = self.lock() {
            let _ = w.flush();
        }
    }
}

/// Record a proxy failure with target, phase and cause chain, then flush.
pub fn report(log: &dyn ErrorLog, err: &ProxyError) {
    log.write_line(&format!(
        "Proxy error when proxying to {}: {} phase: {}",
        err.target(),
        err.phase(),
        err
    ));
    let mut cause = err.source();
    while let Some(e) = cause {
        log.write_line(&format!("\t{}", e));
        cause = e.source();
    }
    log.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_writes_cause_chain() {
        let sink = Mutex::new(Vec::<u8>::new());
        let err = ProxyError::Connect {
            target: "http://127.0.0.1:1/".into(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        };

        report(&sink, &err);

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Proxy error when proxying to http://127.0.0.1:1/: header phase"));
        assert_eq!(lines[1], "\tconnection refused");
    }
}
