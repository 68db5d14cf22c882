//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request head (host, path, query)
//!     → router.rs (route lookup by priority)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: absolute upstream URI, or None to stay local
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Parse upstream base URIs
//!     → Sort by priority
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always yields the same target, so the
//!   table is safe to evaluate twice for an internal redirect

pub mod matcher;
pub mod router;

pub use router::{Route, RouteError, RouteTable};
