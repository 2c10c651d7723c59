//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (at startup):
//!     (pattern, Methods, HandlerTriad)[]
//!     → router.rs: compile() parses segments (matcher.rs)
//!     → Segment tree, immutable while serving
//!
//! Incoming request (method, path)
//!     → router.rs: walk the tree segment by segment
//!     → matcher.rs: slug regex per segment, captures into Vars
//!     → Return: RouteMatch { vars, triad } or NotFound
//! ```
//!
//! # Design Decisions
//! - Routes compiled before serving, immutable at runtime
//! - Regex only for slugged segments; literal segments are map lookups
//! - Deterministic: same input always matches same route

pub mod handler;
pub mod matcher;
pub mod router;

pub use handler::{Handler, HandlerTriad, Vars};
pub use router::{Methods, RouteMatch, Router, RouterError};
