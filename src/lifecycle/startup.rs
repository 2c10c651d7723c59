//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (timer driver, metrics)
//! - Bind the listener and begin accepting traffic
//! - Tear everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;

use tokio::task::JoinHandle;

use crate::config::SupernodeConfig;
use crate::error::EngineError;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::Listener;
use crate::observability::metrics;
use crate::routing::Router;
use crate::scheduler::Manager;

/// A started engine: listener bound, timer driver running.
pub struct RunningEngine {
    local_addr: SocketAddr,
    manager: Manager,
    shutdown: Shutdown,
    server: JoinHandle<Result<(), std::io::Error>>,
    timers: JoinHandle<()>,
}

/// Build the manager, bind the listener and start serving.
pub async fn start(config: SupernodeConfig, router: Router) -> Result<RunningEngine, EngineError> {
    let manager = Manager::new(config, router)?;
    let config = manager.config();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        coap_address = %config.server.coap_address,
        "CoAP transport is not served; address recorded only"
    );

    let listener = Listener::bind(&config.server).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = Shutdown::new();
    let timers = manager.start(shutdown.subscribe());
    let server = tokio::spawn(HttpServer::new(manager.clone()).run(listener, shutdown.subscribe()));

    tracing::info!(address = %local_addr, "Supernode ready");
    Ok(RunningEngine {
        local_addr,
        manager,
        shutdown,
        server,
        timers,
    })
}

impl RunningEngine {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Handle to trigger shutdown from elsewhere (signals, tests).
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait until shutdown is triggered and everything has stopped.
    pub async fn wait(self) -> Result<(), EngineError> {
        let served = match self.server.await {
            Ok(result) => result.map_err(EngineError::from),
            Err(e) => Err(EngineError::Io(std::io::Error::other(e))),
        };
        // The server may also stop on its own error; make sure the timer
        // driver stops with it.
        self.shutdown.trigger();
        if let Err(e) = self.timers.await {
            tracing::error!(error = %e, "Timer driver terminated abnormally");
        }
        let manager = self.manager;
        if let Err(e) = tokio::task::spawn_blocking(move || manager.shutdown()).await {
            tracing::error!(error = %e, "Worker pool shutdown failed");
        }
        tracing::info!("Shutdown complete");
        served
    }

    /// Trigger shutdown and wait for it to finish.
    pub async fn stop(self) -> Result<(), EngineError> {
        self.shutdown.trigger();
        self.wait().await
    }
}
