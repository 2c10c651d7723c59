//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (hyper http1 connection, Axum app, request ID, body limit)
//!     → body read within http_connection_timeout
//!     → scheduler::Manager::dispatch
//!     → Outcome::Respond → status / headers / body written
//!     → Outcome::Drop    → connection closed, nothing written
//! ```

pub mod server;

use axum::http::HeaderName;
use thiserror::Error;

pub use server::{AppState, HttpServer};

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Response extension: close the connection instead of sending this response.
#[derive(Debug, Clone, Copy)]
pub struct DropConnection;

/// Service error that makes hyper abort the connection.
#[derive(Debug, Error)]
#[error("connection dropped without a response")]
pub struct DroppedConnection;
