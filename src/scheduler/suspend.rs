//! Deadline table for suspended tasks.
//!
//! A task suspends while it waits in the worker queue or on an upstream
//! reply. Whoever removes its entry first decides its fate: the side that
//! completes the wait (`resume`) or the timer sweep (`expire`). The loser
//! observes the entry missing and backs off.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::observability::metrics;
use crate::task::TaskId;

/// Far-future bound used when `now + after` does not fit in an `Instant`.
const MAX_DEADLINE: Duration = Duration::from_secs(86_400);

/// `now + after`, never overflowing.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(MAX_DEADLINE))
        .unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendKind {
    Queue,
    Upstream,
}

impl SuspendKind {
    fn as_str(self) -> &'static str {
        match self {
            SuspendKind::Queue => "queue",
            SuspendKind::Upstream => "upstream",
        }
    }
}

#[derive(Debug)]
struct Suspension {
    deadline: Instant,
    kind: SuspendKind,
    cancel: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub struct SuspendTable {
    entries: DashMap<TaskId, Suspension>,
}

impl SuspendTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `id` until `deadline`. The receiver fires with `Ok(())` if the
    /// sweep expires the task, and closes if the task is resumed first.
    pub fn suspend(&self, id: TaskId, deadline: Instant, kind: SuspendKind) -> oneshot::Receiver<()> {
        let (cancel, expired) = oneshot::channel();
        self.entries.insert(id, Suspension { deadline, kind, cancel });
        expired
    }

    /// Claim `id` for resumption. `false` means it already expired.
    pub fn resume(&self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Expire every entry whose deadline is not after `now`.
    pub fn expire(&self, now: Instant) -> usize {
        let due: Vec<TaskId> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| *e.key())
            .collect();

        let mut expired = 0;
        for id in due {
            if let Some((_, s)) = self.entries.remove_if(&id, |_, s| s.deadline <= now) {
                tracing::warn!(task_id = %id, kind = s.kind.as_str(), "Suspended task expired");
                metrics::record_timeout(s.kind.as_str());
                let _ = s.cancel.send(());
                expired += 1;
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_after_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(1)), now + Duration::from_secs(1));
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_DEADLINE);
    }

    #[test]
    fn expire_fires_cancel_once() {
        let table = SuspendTable::new();
        let now = Instant::now();
        let id = TaskId::new();
        let mut rx = table.suspend(id, now, SuspendKind::Upstream);

        assert_eq!(table.expire(now), 1);
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(!table.resume(id));
        assert_eq!(table.expire(now), 0);
    }

    #[test]
    fn resume_wins_before_deadline() {
        let table = SuspendTable::new();
        let now = Instant::now();
        let id = TaskId::new();
        let mut rx = table.suspend(id, now + Duration::from_secs(60), SuspendKind::Queue);

        assert_eq!(table.expire(now), 0);
        assert!(table.resume(id));
        assert!(rx.try_recv().is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn only_due_entries_expire() {
        let table = SuspendTable::new();
        let now = Instant::now();
        let _a = table.suspend(TaskId::new(), now, SuspendKind::Queue);
        let _b = table.suspend(TaskId::new(), now + Duration::from_secs(60), SuspendKind::Queue);
        assert_eq!(table.expire(now), 1);
        assert_eq!(table.len(), 1);
    }
}
