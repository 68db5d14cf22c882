//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! SIGTERM/SIGINT (signals.rs)
//!     → Shutdown::trigger (shutdown.rs)
//!     → every subscriber wakes: server stops accepting, drains in-flight requests
//! ```
//!
//! # Design Decisions
//! - One broadcast coordinator per process, handed to whoever needs to stop
//! - Triggering twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{listen_for_signals, shutdown_signal};
