//! Periodic task registry.
//!
//! # Responsibilities
//! - Hold registered periodic triads with their interval and next due time
//! - Hand due ticks to the timer driver, one in flight per task at most
//! - Keep each periodic task's `Task` (local context, `last_status`) across ticks
//!
//! # Design Decisions
//! - A slot whose task is out (running) is never handed out again until
//!   `finish` returns it, so ticks of one periodic task never overlap
//! - A late tick is not replayed; the next due time restarts from now

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::context::GlobalContext;
use crate::routing::{HandlerTriad, Vars};
use crate::scheduler::suspend::deadline_after;
use crate::task::{Input, Task};

/// A triad fired on a fixed interval.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    triad: Arc<HandlerTriad>,
    interval: Duration,
    follow_up_on_forward: bool,
}

impl PeriodicTask {
    pub fn new(triad: HandlerTriad, interval: Duration) -> Self {
        Self {
            triad: Arc::new(triad),
            interval,
            follow_up_on_forward: true,
        }
    }

    /// With `true` (the default) a tick whose WORKER returns Forward makes the
    /// upstream call and re-invokes WORKER with the reply in the same tick.
    /// With `false` the reply is delivered to the next tick instead.
    pub fn follow_up_on_forward(mut self, enabled: bool) -> Self {
        self.follow_up_on_forward = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn follows_up(&self) -> bool {
        self.follow_up_on_forward
    }

    pub(crate) fn fresh_task(&self, global: Arc<GlobalContext>) -> Task {
        Task::new(Arc::clone(&self.triad), Vars::new(), Input::default(), global)
    }
}

/// Registry handle for one periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodicId(u64);

impl std::fmt::Display for PeriodicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "periodic-{}", self.0)
    }
}

/// One tick handed to the timer driver.
#[derive(Debug)]
pub(crate) struct DueTick {
    pub id: PeriodicId,
    pub spec: PeriodicTask,
    pub task: Task,
    /// Upstream reply held over from the previous tick.
    pub reply: Option<Bytes>,
}

#[derive(Debug)]
struct Slot {
    id: PeriodicId,
    spec: PeriodicTask,
    next_due: Instant,
    task: Option<Task>,
    reply: Option<Bytes>,
}

#[derive(Debug, Default)]
pub struct PeriodicRegistry {
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
}

impl PeriodicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: PeriodicTask, global: Arc<GlobalContext>) -> PeriodicId {
        let id = PeriodicId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = spec.fresh_task(global);
        let next_due = deadline_after(Instant::now(), spec.interval);
        tracing::info!(periodic = %id, interval_ms = spec.interval.as_millis() as u64, "Periodic task registered");
        self.slots.lock().push(Slot {
            id,
            spec,
            next_due,
            task: Some(task),
            reply: None,
        });
        id
    }

    /// Take every idle slot that is due at `now`.
    pub(crate) fn take_due(&self, now: Instant) -> Vec<DueTick> {
        let mut slots = self.slots.lock();
        let mut due = Vec::new();
        for slot in slots.iter_mut() {
            if slot.next_due > now {
                continue;
            }
            let Some(task) = slot.task.take() else {
                continue;
            };
            slot.next_due = deadline_after(slot.next_due, slot.spec.interval);
            if slot.next_due <= now {
                slot.next_due = deadline_after(now, slot.spec.interval);
            }
            due.push(DueTick {
                id: slot.id,
                spec: slot.spec.clone(),
                task,
                reply: slot.reply.take(),
            });
        }
        due
    }

    /// Return a task after its tick. Ignored if the slot was deregistered.
    pub(crate) fn finish(&self, id: PeriodicId, task: Task, reply: Option<Bytes>) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
            slot.task = Some(task);
            slot.reply = reply;
        }
    }

    pub fn deregister(&self, id: PeriodicId) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|s| s.id != id);
        let removed = slots.len() != before;
        if removed {
            tracing::info!(periodic = %id, "Periodic task deregistered");
        }
        removed
    }

    pub fn contains(&self, id: PeriodicId) -> bool {
        self.slots.lock().iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}
