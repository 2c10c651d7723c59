//! Supernode request-processing engine.
//!
//! Requests are matched by [`routing::Router`], run through a PRE / WORKER /
//! POST handler triad by [`scheduler::Manager`], optionally forwarded to the
//! cryptonode between rounds, and answered over HTTP.

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod scheduler;
pub mod task;
pub mod upstream;

pub use config::SupernodeConfig;
pub use context::{Context, GlobalContext, LocalContext, Value};
pub use error::EngineError;
pub use http::HttpServer;
pub use lifecycle::{RunningEngine, Shutdown};
pub use routing::{HandlerTriad, Methods, Router, Vars};
pub use scheduler::{Manager, PeriodicTask};
pub use task::{Input, Output, Status};
