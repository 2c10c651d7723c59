//! Stage results and pipeline positions.

use std::fmt;

/// Result returned by every handler stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Stage succeeded; advance.
    Ok,
    /// WORKER needs an upstream round trip before the task can finish.
    Forward,
    /// Unrecoverable; abort and answer with an error.
    Error,
    /// Abandon silently; the connection is closed without a response.
    Drop,
    /// No result yet. Ok for linear stages, "skip output" for periodic ticks.
    None,
    /// Periodic tasks only: deregister, no further ticks.
    Stop,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::Forward => "forward",
            Status::Error => "error",
            Status::Drop => "drop",
            Status::None => "none",
            Status::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Where a task currently sits in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pre,
    Worker,
    Post,
    /// Suspended until the upstream reply or its deadline.
    Upstream,
    Done,
    Error,
    Drop,
}

impl Stage {
    /// `Done`, `Error` and `Drop` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Error | Stage::Drop)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Pre => "pre",
            Stage::Worker => "worker",
            Stage::Post => "post",
            Stage::Upstream => "upstream",
            Stage::Done => "done",
            Stage::Error => "error",
            Stage::Drop => "drop",
        };
        f.write_str(s)
    }
}
