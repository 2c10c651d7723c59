//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the supernode.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the supernode engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SupernodeConfig {
    /// Listener settings and request timing.
    pub server: ServerConfig,

    /// Cryptonode address and forwarding behaviour.
    pub upstream: UpstreamConfig,

    /// Worker pool sizing and timer granularity.
    pub workers: WorkersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address (e.g., "127.0.0.1:9084").
    pub http_address: String,

    /// CoAP bind address. Parsed and validated, not served.
    pub coap_address: String,

    /// Seconds allowed to receive one request, and the queue deadline of a
    /// task waiting for a worker.
    pub http_connection_timeout: f64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: "127.0.0.1:9084".to_string(),
            coap_address: "127.0.0.1:9086".to_string(),
            http_connection_timeout: 1.0,
            max_connections: 10_000,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn connection_timeout(&self) -> Duration {
        secs(self.http_connection_timeout)
    }
}

/// Upstream (cryptonode) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Default upstream address, with or without scheme and path.
    pub cryptonode_rpc_address: String,

    /// Seconds to wait for an upstream reply.
    pub upstream_request_timeout: f64,

    /// `$name` → replacement table applied by `Output::make_uri`.
    pub uri_substitutions: HashMap<String, String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            cryptonode_rpc_address: "127.0.0.1:28881".to_string(),
            upstream_request_timeout: 1.0,
            uri_substitutions: HashMap::new(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        secs(self.upstream_request_timeout)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Worker threads. 0 runs WORKER stages inline on the I/O thread.
    pub workers_count: usize,

    /// Queue capacity in front of the workers. 0 means unbounded.
    pub worker_queue_len: usize,

    /// Granularity of the timer driver (periodic ticks and expiry sweeps).
    pub timer_poll_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            workers_count: 4,
            worker_queue_len: 32,
            timer_poll_interval_ms: 50,
        }
    }
}

impl WorkersConfig {
    pub fn timer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timer_poll_interval_ms.min(MAX_TIMER_POLL_MS))
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Longest accepted timeout, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 3_600.0;

/// Longest accepted timer poll interval, in milliseconds.
pub const MAX_TIMER_POLL_MS: u64 = 60_000;

/// Seconds as configured, clamped to [`MAX_TIMEOUT_SECS`].
/// Validation rejects non-positive and non-finite values before this runs.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_TIMEOUT_SECS))
        .unwrap_or(Duration::from_secs(MAX_TIMEOUT_SECS as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: SupernodeConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.http_address, "127.0.0.1:9084");
        assert_eq!(config.workers.workers_count, 4);
        assert_eq!(config.server.connection_timeout(), Duration::from_secs(1));
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: SupernodeConfig = toml::from_str(
            r#"
            [server]
            http_connection_timeout = 0.25

            [upstream]
            cryptonode_rpc_address = "http://10.0.0.2:28881/json_rpc"

            [upstream.uri_substitutions]
            my_ip = "1.2.3.4"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.connection_timeout(), Duration::from_millis(250));
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.upstream.uri_substitutions["my_ip"], "1.2.3.4");
        assert_eq!(config.upstream.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn oversized_timeouts_are_clamped() {
        let mut config = SupernodeConfig::default();
        config.server.http_connection_timeout = 1e19;
        config.upstream.upstream_request_timeout = f64::INFINITY;
        config.workers.timer_poll_interval_ms = u64::MAX;
        assert_eq!(config.server.connection_timeout(), Duration::from_secs(3_600));
        assert_eq!(config.upstream.request_timeout(), Duration::from_secs(3_600));
        assert_eq!(config.workers.timer_poll_interval(), Duration::from_secs(60));
    }
}
