//! Upstream (cryptonode) subsystem.
//!
//! # Data Flow
//! ```text
//! Task in Stage::Upstream (WORKER returned Forward, POST ran)
//!     → client.rs: make_uri + POST (raw body or multicast envelope)
//!     → reply body, or UpstreamError
//!     → manager resumes the task (reply → input) or aborts it (500, empty)
//! ```
//!
//! # Design Decisions
//! - One pooled `reqwest::Client` shared by every task
//! - The client timeout and the suspension deadline are the same value

pub mod client;
pub mod routes;
pub mod types;

pub use client::Forwarder;
pub use routes::{acknowledge, register_forward_routes, JSON_RPC_PATH};
pub use types::{MulticastAck, MulticastReply, MulticastRequest, UpstreamError};
