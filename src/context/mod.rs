//! Context subsystem.
//!
//! # Data Flow
//! ```text
//! Manager (startup)
//!     → GlobalContext (one per process, Arc-shared)
//!
//! Task creation
//!     → LocalContext (owned by the task)
//!     → Context { global, local, last_status } handed to every stage
//!
//! Task DONE / ERROR / DROP
//!     → LocalContext dropped with the task
//! ```
//!
//! # Design Decisions
//! - Values are a tagged union; typed reads fail with `TypeMismatch`
//! - Global store is sharded by key hash (DashMap)
//! - Local store is a plain map, never shared across tasks

pub mod global;
pub mod local;
pub mod value;

use std::sync::Arc;

pub use global::GlobalContext;
pub use local::LocalContext;
pub use value::{ContextError, ContextValue, Value};

use crate::task::Status;

/// The context handed to every pipeline stage.
#[derive(Debug)]
pub struct Context {
    pub global: Arc<GlobalContext>,
    pub local: LocalContext,
    last_status: Status,
}

impl Context {
    pub fn new(global: Arc<GlobalContext>) -> Self {
        Self {
            global,
            local: LocalContext::new(),
            last_status: Status::None,
        }
    }

    /// Status of the most recent WORKER invocation; `Forward` after a resume.
    pub fn last_status(&self) -> Status {
        self.last_status
    }

    pub(crate) fn set_last_status(&mut self, status: Status) {
        self.last_status = status;
    }
}
