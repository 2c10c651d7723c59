//! Supernode (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌───────────────────────────────────────────────────────┐
//!                   │                      SUPERNODE                         │
//!                   │                                                        │
//!  Client Request   │  ┌─────────┐   ┌─────────┐   ┌──────────────────────┐  │
//!  ─────────────────┼─▶│   net   │──▶│  http   │──▶│ scheduler::Manager   │  │
//!                   │  │listener │   │ server  │   │  router → Task       │  │
//!                   │  └─────────┘   └─────────┘   └──────────┬───────────┘  │
//!                   │                                         │              │
//!                   │                 PRE / POST (I/O thread) │ WORKER       │
//!                   │                                         ▼              │
//!                   │                               ┌──────────────────┐     │
//!                   │                               │   worker pool    │     │
//!                   │                               └────────┬─────────┘     │
//!                   │                                Forward │               │
//!                   │                                        ▼               │
//!  Client Response  │  ┌─────────┐                  ┌──────────────────┐     │
//!  ◀────────────────┼──│  http   │◀─── next round ──│ upstream client  │◀────┼── Cryptonode
//!                   │  └─────────┘                  └──────────────────┘     │
//!                   │                                                        │
//!                   │  ┌──────────────────────────────────────────────────┐  │
//!                   │  │ context (global/local) · config · observability  │  │
//!                   │  │ lifecycle (signals, shutdown) · timer driver     │  │
//!                   │  └──────────────────────────────────────────────────┘  │
//!                   └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use supernode::config::{load_config, SupernodeConfig};
use supernode::lifecycle::{self, signals};
use supernode::observability::logging;
use supernode::routing::Router;
use supernode::upstream::register_forward_routes;

#[derive(Debug, Parser)]
#[command(name = "supernode", version, about = "Supernode request-processing engine")]
struct Args {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => SupernodeConfig::default(),
    };
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init_tracing(&level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "supernode starting"
    );

    // One thread drives network I/O and timers; WORKER stages run on the
    // manager's own pool threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut router = Router::new();
        register_forward_routes(&mut router);

        let engine = lifecycle::start(config, router).await?;
        signals::spawn_signal_handler(engine.shutdown_handle());
        engine.wait().await
    })?;

    Ok(())
}
