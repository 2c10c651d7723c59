//! Cryptonode forwarder.
//!
//! # Responsibilities
//! - Resolve the target URI of a forwarded output
//! - POST the payload, raw or wrapped in the multicast envelope
//! - Bound every call by `upstream_request_timeout`
//! - Classify failures (timeout, transport, status, envelope)

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::config::UpstreamConfig;
use crate::observability::metrics;
use crate::task::Output;
use crate::upstream::types::{MulticastReply, MulticastRequest, UpstreamError, STATUS_OK};

/// Sends forwarded task output to the cryptonode.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    default_uri: String,
    substitutions: HashMap<String, String>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;
        Ok(Self {
            client,
            default_uri: config.cryptonode_rpc_address.clone(),
            substitutions: config.uri_substitutions.clone(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute URI `output` goes to. A scheme-less result gets `http://`.
    pub fn target_uri(&self, output: &Output) -> String {
        let uri = output.make_uri(&self.default_uri, &self.substitutions);
        if uri.contains("://") {
            uri
        } else {
            format!("http://{}", uri)
        }
    }

    /// Forward `output` and return the payload to resume the task with.
    pub async fn forward(&self, mut output: Output) -> Result<Bytes, UpstreamError> {
        let uri = self.target_uri(&output);
        let result = match output.multicast.take() {
            Some(mc) => {
                let envelope = MulticastRequest {
                    sender_address: mc.sender_address,
                    receiver_addresses: mc.receiver_addresses,
                    callback_uri: mc.callback_uri,
                    data: String::from_utf8_lossy(&output.body).into_owned(),
                };
                self.send_multicast(&uri, &envelope).await
            }
            None => self.send_raw(&uri, output).await,
        };

        match &result {
            Ok(reply) => {
                metrics::record_upstream_call("ok");
                tracing::debug!(uri = %uri, reply_len = reply.len(), "Upstream replied");
            }
            Err(UpstreamError::Timeout) => {
                metrics::record_upstream_call("timeout");
                tracing::warn!(uri = %uri, timeout_ms = self.timeout.as_millis() as u64, "Upstream timed out");
            }
            Err(e) => {
                metrics::record_upstream_call("error");
                tracing::warn!(uri = %uri, error = %e, "Upstream call failed");
            }
        }
        result
    }

    async fn send_raw(&self, uri: &str, output: Output) -> Result<Bytes, UpstreamError> {
        let response = self
            .client
            .post(uri)
            .headers(output.headers)
            .body(output.body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus(status.as_u16()));
        }
        Ok(response.bytes().await?)
    }

    async fn send_multicast(&self, uri: &str, envelope: &MulticastRequest) -> Result<Bytes, UpstreamError> {
        let response = self.client.post(uri).json(envelope).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus(status.as_u16()));
        }
        let body = response.bytes().await?;
        let reply: MulticastReply =
            serde_json::from_slice(&body).map_err(|e| UpstreamError::BadEnvelope(e.to_string()))?;
        if reply.status != STATUS_OK {
            return Err(UpstreamError::Rejected(reply.status));
        }
        Ok(reply.data.map(Bytes::from).unwrap_or_default())
    }
}
