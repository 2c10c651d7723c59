//! Per-request state machine.
//!
//! # State Transitions
//! ```text
//! Pre ──Ok/None──▶ Worker ──Ok/None───▶ Post ──▶ Done
//!                    │                   ▲
//!                    └──Forward──────────┘ (round marked forwarding)
//!                                 Post ──▶ Upstream ──reply──▶ Pre (last_status = Forward)
//!
//! Error / Drop from any stage ──▶ Error / Drop (absorbing)
//! ```
//!
//! The task is moved between the I/O thread and worker threads by value, so
//! at most one stage of it can run at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::context::{Context, GlobalContext};
use crate::routing::{HandlerTriad, Vars};
use crate::task::io::{Input, Output};
use crate::task::status::{Stage, Status};

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new() -> Self {
        Self(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One in-flight request or periodic firing.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    vars: Vars,
    triad: Arc<HandlerTriad>,
    input: Input,
    output: Output,
    ctx: Context,
    stage: Stage,
    /// WORKER returned Forward in the current round.
    forward_round: bool,
    /// Deadline of the outstanding upstream call, if any.
    forward_pending: Option<Instant>,
    /// Expiry of the current suspension (queued or awaiting upstream).
    suspended_until: Option<Instant>,
    /// Absolute expiry of the whole task, across every Forward round.
    deadline: Option<Instant>,
    rounds: u32,
}

impl Task {
    pub fn new(triad: Arc<HandlerTriad>, vars: Vars, input: Input, global: Arc<GlobalContext>) -> Self {
        Self {
            id: TaskId::new(),
            vars,
            triad,
            input,
            output: Output::default(),
            ctx: Context::new(global),
            stage: Stage::Pre,
            forward_round: false,
            forward_pending: None,
            suspended_until: None,
            deadline: None,
            rounds: 0,
        }
    }

    /// Bound the whole task by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn last_status(&self) -> Status {
        self.ctx.last_status()
    }

    /// Completed upstream round trips.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn forward_pending(&self) -> Option<Instant> {
        self.forward_pending
    }

    /// Absolute expiry of the whole task.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Expiry of the current suspension, if suspended.
    pub fn suspended_until(&self) -> Option<Instant> {
        self.suspended_until
    }

    pub(crate) fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// `stage_deadline`, shortened to the task deadline.
    pub fn cap(&self, stage_deadline: Instant) -> Instant {
        match self.deadline {
            Some(d) => d.min(stage_deadline),
            None => stage_deadline,
        }
    }

    /// Suspend until `deadline`, capped by the task deadline. Returns the
    /// effective expiry.
    pub(crate) fn suspend_until(&mut self, deadline: Instant) -> Instant {
        let until = self.cap(deadline);
        self.suspended_until = Some(until);
        until
    }

    pub(crate) fn mark_forward_pending(&mut self, deadline: Instant) -> Instant {
        let until = self.suspend_until(deadline);
        self.forward_pending = Some(until);
        until
    }

    pub(crate) fn clear_suspension(&mut self) {
        self.suspended_until = None;
        self.forward_pending = None;
    }

    /// The current suspension or the whole task ran out.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.suspended_until.is_some_and(|d| d <= now) || self.deadline.is_some_and(|d| d <= now)
    }

    /// Give up on the task: `Error` with an empty body. POST already begun
    /// is left to finish.
    pub(crate) fn expire(&mut self) {
        self.output = Output::default();
        self.clear_suspension();
        self.stage = Stage::Error;
    }

    /// Run the handler of the current stage. Absent stages pass as `Ok`.
    ///
    /// A non-empty output left by the previous stage becomes this stage's
    /// input before the handler runs.
    pub fn run_stage(&mut self) -> Status {
        let triad = Arc::clone(&self.triad);
        let handler = match self.stage {
            Stage::Pre => triad.pre.as_ref(),
            Stage::Worker => Some(&triad.worker),
            Stage::Post => triad.post.as_ref(),
            stage => {
                tracing::warn!(task_id = %self.id, %stage, "run_stage on a non-runnable stage");
                return Status::Error;
            }
        };
        let Some(handler) = handler else {
            return Status::Ok;
        };

        if !self.output.body.is_empty() {
            self.input.body = Bytes::from(std::mem::take(&mut self.output.body));
        }
        handler(&self.vars, &self.input, &mut self.ctx, &mut self.output)
    }

    /// Apply the status returned by the current stage.
    pub fn advance(&mut self, status: Status) {
        let from = self.stage;
        self.stage = match (from, status) {
            (Stage::Pre, Status::Ok | Status::None) => Stage::Worker,
            (Stage::Pre, Status::Drop) => Stage::Drop,
            (Stage::Pre, _) => Stage::Error,

            (Stage::Worker, s) => {
                self.ctx.set_last_status(s);
                match s {
                    Status::Ok | Status::None => {
                        self.forward_round = false;
                        Stage::Post
                    }
                    Status::Forward => {
                        self.forward_round = true;
                        Stage::Post
                    }
                    Status::Drop => Stage::Drop,
                    Status::Error | Status::Stop => Stage::Error,
                }
            }

            (Stage::Post, Status::Error) => {
                self.output.body.clear();
                Stage::Error
            }
            (Stage::Post, Status::Drop) => Stage::Drop,
            (Stage::Post, _) if self.forward_round => Stage::Upstream,
            (Stage::Post, _) => Stage::Done,

            (stage, _) => stage,
        };
        tracing::trace!(task_id = %self.id, %from, to = %self.stage, %status, "stage transition");
    }

    /// Feed an upstream reply back in and start the next round.
    pub fn resume(&mut self, reply: Bytes) {
        self.input.body = reply;
        self.output.body.clear();
        self.output.multicast = None;
        self.ctx.set_last_status(Status::Forward);
        self.forward_round = false;
        self.clear_suspension();
        self.rounds += 1;
        self.stage = Stage::Pre;
    }

    /// Rewind a periodic task for its next tick, keeping `last_status` and
    /// the local context. The caller sets the tick's deadline.
    pub(crate) fn rearm(&mut self) {
        self.input = Input::default();
        self.output = Output::default();
        self.forward_round = false;
        self.clear_suspension();
        self.deadline = None;
        self.stage = Stage::Pre;
    }

    /// Record the status of a periodic WORKER that ends the tick.
    pub(crate) fn record_worker_status(&mut self, status: Status) {
        self.ctx.set_last_status(status);
    }

    pub(crate) fn take_output(&mut self) -> Output {
        std::mem::take(&mut self.output)
    }
}
