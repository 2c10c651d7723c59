//! Scheduler subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest (from http/server.rs)
//!     → manager.rs: Router::match_route → Task::new
//!     → PRE on the I/O thread
//!     → pool.rs: WORKER on a worker thread (suspend.rs: queue deadline)
//!     → Forward? upstream call (suspend.rs: upstream deadline) → next round
//!     → POST on the I/O thread
//!     → Outcome (respond / drop) back to the transport
//!
//! Timer driver (every timer_poll_interval_ms):
//!     → suspend.rs: expire past-deadline suspensions (→ 500, empty body)
//!     → periodic.rs: spawn due periodic ticks
//! ```
//!
//! # Design Decisions
//! - Bounded queue in front of the pool; a full queue is a 503, not a wait
//! - Expiry is decided by whoever removes the suspension entry first

pub mod manager;
pub mod periodic;
pub mod pool;
pub mod suspend;

pub use manager::{InboundRequest, Manager, Outcome};
pub use periodic::{PeriodicId, PeriodicRegistry, PeriodicTask};
pub use pool::{Job, PoolError, WorkerPool};
pub use suspend::{SuspendKind, SuspendTable};
