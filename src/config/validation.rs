//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses parse as socket addresses
//! - Validate value ranges (timeouts finite, > 0 and bounded, sizes > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SupernodeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{SupernodeConfig, MAX_TIMEOUT_SECS, MAX_TIMER_POLL_MS};

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &SupernodeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut reject = |field: &'static str, message: String| {
        errors.push(ValidationError { field, message });
    };

    for (field, value) in [
        ("server.http_address", &config.server.http_address),
        ("server.coap_address", &config.server.coap_address),
    ] {
        if value.parse::<SocketAddr>().is_err() {
            reject(field, format!("'{}' is not a socket address", value));
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        reject(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        );
    }

    for (field, value) in [
        ("server.http_connection_timeout", config.server.http_connection_timeout),
        ("upstream.upstream_request_timeout", config.upstream.upstream_request_timeout),
    ] {
        if !value.is_finite() || value <= 0.0 {
            reject(field, format!("must be a positive number of seconds, got {}", value));
        } else if value > MAX_TIMEOUT_SECS {
            reject(field, format!("must be at most {} seconds, got {}", MAX_TIMEOUT_SECS, value));
        }
    }

    if config.workers.timer_poll_interval_ms == 0 {
        reject("workers.timer_poll_interval_ms", "must be > 0".to_string());
    } else if config.workers.timer_poll_interval_ms > MAX_TIMER_POLL_MS {
        reject(
            "workers.timer_poll_interval_ms",
            format!("must be at most {}", MAX_TIMER_POLL_MS),
        );
    }
    if config.server.max_connections == 0 {
        reject("server.max_connections", "must be > 0".to_string());
    }
    if config.server.max_body_size == 0 {
        reject("server.max_body_size", "must be > 0".to_string());
    }
    if config.upstream.cryptonode_rpc_address.trim().is_empty() {
        reject("upstream.cryptonode_rpc_address", "must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&SupernodeConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let mut config = SupernodeConfig::default();
        config.server.http_address = "not-an-address".to_string();
        config.server.http_connection_timeout = 0.0;
        config.upstream.upstream_request_timeout = f64::NAN;
        config.workers.timer_poll_interval_ms = 0;
        config.upstream.cryptonode_rpc_address = " ".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "server.http_address",
                "server.http_connection_timeout",
                "upstream.upstream_request_timeout",
                "workers.timer_poll_interval_ms",
                "upstream.cryptonode_rpc_address",
            ]
        );
    }

    #[test]
    fn rejects_timeouts_above_the_maximum() {
        let mut config = SupernodeConfig::default();
        config.server.http_connection_timeout = 1e19;
        config.upstream.upstream_request_timeout = MAX_TIMEOUT_SECS;
        config.workers.timer_poll_interval_ms = MAX_TIMER_POLL_MS + 1;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["server.http_connection_timeout", "workers.timer_poll_interval_ms"]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = SupernodeConfig::default();
        config.observability.metrics_address = "bogus".to_string();
        assert!(validate_config(&config).is_ok());
        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
