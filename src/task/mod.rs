//! Task subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request / periodic tick
//!     → Task::new (vars, input, LocalContext)
//!     → state.rs: run_stage + advance, driven by the scheduler
//!     → io.rs: Output becomes the next stage's Input, or the response
//! ```

pub mod io;
pub mod state;
pub mod status;

pub use io::{Input, Multicast, Output, PayloadError};
pub use state::{Task, TaskId};
pub use status::{Stage, Status};
