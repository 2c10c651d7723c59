//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{StatusCode, Uri};
use bytes::Bytes;
use tokio::net::TcpListener;

use supernode::context::Context;
use supernode::lifecycle::{self, RunningEngine};
use supernode::routing::{Router, Vars};
use supernode::task::{Input, Output, Status};
use supernode::SupernodeConfig;

/// Config with an ephemeral HTTP port and a fast timer driver.
pub fn test_config() -> SupernodeConfig {
    let mut config = SupernodeConfig::default();
    config.server.http_address = "127.0.0.1:0".to_string();
    config.server.http_connection_timeout = 2.0;
    config.workers.workers_count = 2;
    config.workers.worker_queue_len = 8;
    config.workers.timer_poll_interval_ms = 10;
    config.upstream.upstream_request_timeout = 2.0;
    config
}

pub async fn start_engine(config: SupernodeConfig, router: Router) -> RunningEngine {
    lifecycle::start(config, router).await.expect("engine failed to start")
}

pub fn url(engine: &RunningEngine, path: &str) -> String {
    format!("http://{}{}", engine.local_addr(), path)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Start a programmable mock cryptonode on an ephemeral port.
///
/// `f` receives the request path and body and returns status and body.
pub async fn start_mock_cryptonode<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, Vec<u8>)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let app = axum::Router::new().fallback(move |uri: Uri, body: Bytes| {
        let f = Arc::clone(&f);
        async move {
            let (status, body) = f(uri.path().to_string(), body).await;
            (StatusCode::from_u16(status).unwrap(), body)
        }
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Stage that appends `ch` to its input body.
pub fn append(ch: char) -> impl Fn(&Vars, &Input, &mut Context, &mut Output) -> Status + Send + Sync + 'static {
    move |_, input, _, output| {
        let mut s = input.body_str().unwrap_or_default().to_string();
        s.push(ch);
        output.set_body(s);
        Status::Ok
    }
}
