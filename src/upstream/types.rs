//! Upstream envelopes and error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status value a cryptonode uses for an accepted multicast.
pub const STATUS_OK: i32 = 0;

/// Errors that can occur while forwarding to the cryptonode.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No reply within `upstream_request_timeout`.
    #[error("upstream request timed out")]
    Timeout,

    /// Connection refused, reset, or another transport failure.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The cryptonode answered with a non-success HTTP status.
    #[error("upstream returned HTTP {0}")]
    BadStatus(u16),

    /// A multicast reply could not be decoded.
    #[error("malformed upstream envelope: {0}")]
    BadEnvelope(String),

    /// A multicast reply carried a non-zero status.
    #[error("upstream rejected multicast with status {0}")]
    Rejected(i32),

    #[error("failed to build upstream client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// Envelope sent to the cryptonode for multicast delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MulticastRequest {
    pub sender_address: String,
    pub receiver_addresses: Vec<String>,
    pub callback_uri: String,
    pub data: String,
}

/// Cryptonode's answer to a [`MulticastRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MulticastReply {
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Body the supernode answers a multicast callback with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MulticastAck {
    pub status: String,
}

impl Default for MulticastAck {
    fn default() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}
