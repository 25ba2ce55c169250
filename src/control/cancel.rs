//! Cancellation requests, observed by runners at their checkpoints.
//!
//! A request publishes the terminal `cancelled` snapshot right away, so
//! observers see the outcome before the runner notices. The runner finds the
//! flag at its next checkpoint and stops without publishing anything further.
//! A collaborator call already in flight runs to completion (or its timeout)
//! first, so the task keeps its admission slot until then.
//!
//! A request for a task that has already reached a terminal snapshot changes
//! nothing.

use crate::progress::{ProgressBus, ProgressSnapshot, Publish};
use crate::task::TaskId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

/// Message carried by the terminal snapshot of a cancelled task.
pub const CANCELLED_MESSAGE: &str = "Task cancelled by user";

/// What a cancellation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was still running or queued and is now cancelled.
    Requested,
    /// The task had already finished; nothing changed.
    AlreadyFinished,
}

/// Set of task identifiers with a pending cancellation.
#[derive(Debug)]
pub struct CancellationRegistry {
    pending: Mutex<HashSet<TaskId>>,
    /// Bumped on every accepted request so waiters can re-check.
    signal: watch::Sender<u64>,
    bus: Arc<ProgressBus>,
}

impl CancellationRegistry {
    pub fn new(bus: Arc<ProgressBus>) -> Self {
        let (signal, _) = watch::channel(0);
        Self {
            pending: Mutex::new(HashSet::new()),
            signal,
            bus,
        }
    }

    /// Request cancellation of `task_id`.
    pub fn request_cancel(&self, task_id: &TaskId) -> CancelOutcome {
        if self.bus.latest(task_id).is_some_and(|s| s.is_terminal()) {
            debug!(task_id = %task_id, "Cancel ignored, task already finished");
            return CancelOutcome::AlreadyFinished;
        }

        self.lock().insert(task_id.clone());
        match self
            .bus
            .publish(task_id, ProgressSnapshot::cancelled(CANCELLED_MESSAGE))
        {
            Publish::Terminal => {
                // Lost the race against the runner's own terminal snapshot.
                self.lock().remove(task_id);
                return CancelOutcome::AlreadyFinished;
            }
            Publish::Accepted | Publish::Unknown => {}
        }

        info!(task_id = %task_id, "Cancellation requested");
        self.signal.send_modify(|generation| *generation += 1);
        CancelOutcome::Requested
    }

    pub fn is_cancelled(&self, task_id: &TaskId) -> bool {
        self.lock().contains(task_id)
    }

    /// Forget a task once its runner has exited.
    pub fn clear(&self, task_id: &TaskId) {
        self.lock().remove(task_id);
    }

    /// Receiver that changes whenever a new request is accepted.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.signal.subscribe()
    }

    /// Resolve once `task_id` has a pending cancellation.
    ///
    /// Runners only race this against the admission wait.
    pub async fn cancelled(&self, task_id: &TaskId) {
        let mut rx = self.subscribe();
        loop {
            if self.is_cancelled(task_id) {
                return;
            }
            if rx.changed().await.is_err() {
                // The registry outlives every runner, so this only happens
                // during teardown.
                std::future::pending::<()>().await;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<TaskId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStatus;
    use std::time::Duration;

    fn setup() -> (Arc<ProgressBus>, CancellationRegistry, TaskId) {
        let bus = Arc::new(ProgressBus::new(Duration::from_millis(50)));
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("queued"))
            .unwrap();
        let reg = CancellationRegistry::new(Arc::clone(&bus));
        (bus, reg, id)
    }

    #[test]
    fn cancel_publishes_terminal_snapshot() {
        let (bus, reg, id) = setup();
        assert_eq!(reg.request_cancel(&id), CancelOutcome::Requested);
        assert!(reg.is_cancelled(&id));

        let latest = bus.latest(&id).unwrap();
        assert_eq!(latest.status, ProgressStatus::Cancelled);
        assert_eq!(latest.message, CANCELLED_MESSAGE);
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let (bus, reg, id) = setup();
        bus.publish(&id, ProgressSnapshot::error("boom"));

        assert_eq!(reg.request_cancel(&id), CancelOutcome::AlreadyFinished);
        assert!(!reg.is_cancelled(&id));
        assert_eq!(bus.latest(&id).unwrap().status, ProgressStatus::Error);
    }

    #[test]
    fn clear_forgets_the_request() {
        let (_bus, reg, id) = setup();
        reg.request_cancel(&id);
        reg.clear(&id);
        assert!(!reg.is_cancelled(&id));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_request() {
        let (_bus, reg, id) = setup();
        let reg = Arc::new(reg);

        let waiter = tokio::spawn({
            let reg = Arc::clone(&reg);
            let id = id.clone();
            async move { reg.cancelled(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        reg.request_cancel(&TaskId::from("other"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "other task's cancel must not wake it");

        reg.request_cancel(&id);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }
}
