//! Scheduler stats snapshot and change-only subscriptions.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::Serialize;

/// Lifecycle of a [`super::TaskScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    /// Every worker failed; requests run synchronously.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkerTaskStats {
    /// Live workers.
    pub total_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    /// Language/theme pairs warm on every live worker.
    pub cached_resources: usize,
    pub manager_state: ManagerState,
}

/// Current snapshot plus subscribers notified on structural change.
#[derive(Default)]
pub(super) struct StatsHub {
    current: Mutex<WorkerTaskStats>,
    subscribers: Mutex<Vec<Sender<WorkerTaskStats>>>,
}

impl StatsHub {
    pub(super) fn snapshot(&self) -> WorkerTaskStats {
        *self.current.lock()
    }

    pub(super) fn subscribe(&self) -> Receiver<WorkerTaskStats> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Apply `change`; subscribers hear about it only if the snapshot differs.
    pub(super) fn update(&self, change: impl FnOnce(&mut WorkerTaskStats)) {
        let mut current = self.current.lock();
        let before = *current;
        change(&mut current);
        if *current == before {
            return;
        }
        let next = *current;
        // Sent under the snapshot lock so subscribers see changes in order.
        self.subscribers.lock().retain(|tx| tx.send(next).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifies_only_on_change() {
        let hub = StatsHub::default();
        let rx = hub.subscribe();

        hub.update(|s| s.total_workers = 2);
        hub.update(|s| s.total_workers = 2);
        hub.update(|s| s.queued_tasks = 1);

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].queued_tasks, 1);
        assert_eq!(hub.snapshot().total_workers, 2);
    }

    #[test]
    fn test_dropped_subscribers_pruned() {
        let hub = StatsHub::default();
        drop(hub.subscribe());
        hub.update(|s| s.busy_workers = 1);
        assert!(hub.subscribers.lock().is_empty());
    }
}
