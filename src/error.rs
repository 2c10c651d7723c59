//! Engine-level error taxonomy.
//!
//! Subsystems keep their own error types; `EngineError` is what crosses the
//! manager boundary and decides the client-visible status.

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::ContextError;
use crate::net::ListenerError;
use crate::routing::RouterError;
use crate::scheduler::PoolError;
use crate::task::PayloadError;
use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("malformed input: {0}")]
    MalformedInput(#[from] PayloadError),

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("worker queue saturated")]
    QueueSaturated,

    #[error("task timed out waiting for a worker")]
    QueueTimeout,

    #[error("task deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    TypeMismatch(#[from] ContextError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Router(RouterError),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Status code a client sees for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::QueueSaturated | EngineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RouterError> for EngineError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NotFound { method, path } => EngineError::RouteNotFound { method, path },
            other => EngineError::Router(other),
        }
    }
}

impl From<UpstreamError> for EngineError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout => EngineError::UpstreamTimeout,
            other => EngineError::UpstreamFailure(other.to_string()),
        }
    }
}

impl From<PoolError> for EngineError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Saturated => EngineError::QueueSaturated,
            PoolError::ShutDown => EngineError::ShuttingDown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_not_found_maps_to_404() {
        let err: EngineError = RouterError::NotFound {
            method: "GET".into(),
            path: "/x".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn saturation_maps_to_503_and_timeouts_to_500() {
        assert_eq!(
            EngineError::from(PoolError::Saturated).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            EngineError::from(UpstreamError::Timeout).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(EngineError::QueueTimeout.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(EngineError::DeadlineExceeded.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
