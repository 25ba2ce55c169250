//! Process-wide pause switch.
//!
//! Pausing is cooperative: runners check the gate between stages and wait
//! there while it is closed. A collaborator call already in progress runs
//! to completion. Paused runners keep their admission slot.

use super::cancel::CancellationRegistry;
use crate::progress::{ProgressBus, ProgressSnapshot, ProgressStatus};
use crate::task::TaskId;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

const PAUSED_MESSAGE: &str = "Paused";

/// Result of waiting at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Proceed,
    Cancelled,
}

/// Single run/pause flag shared by every runner.
#[derive(Debug)]
pub struct PauseGate {
    running: watch::Sender<bool>,
    poll_interval: Duration,
}

impl PauseGate {
    /// A gate that starts open. `poll_interval` bounds how long a waiting
    /// runner can miss a change.
    pub fn new(poll_interval: Duration) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            running,
            poll_interval,
        }
    }

    pub fn pause(&self) {
        if self.running.send_replace(false) {
            info!("Processing paused");
        }
    }

    pub fn resume(&self) {
        if !self.running.send_replace(true) {
            info!("Processing resumed");
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Block while the gate is closed.
    ///
    /// While waiting, the task shows as `paused` with its last percent. On
    /// resume the previous `processing` snapshot is restored. Returns
    /// [`Checkpoint::Cancelled`] as soon as a cancellation for the task is
    /// seen, without publishing anything.
    pub async fn wait_if_paused(
        &self,
        task_id: &TaskId,
        bus: &ProgressBus,
        cancels: &CancellationRegistry,
    ) -> Checkpoint {
        if cancels.is_cancelled(task_id) {
            return Checkpoint::Cancelled;
        }
        if self.is_running() {
            return Checkpoint::Proceed;
        }

        let before = bus.latest(task_id);
        let (message, percent) = match &before {
            Some(s) if s.status != ProgressStatus::Paused => (s.message.clone(), s.percent),
            Some(s) => (String::new(), s.percent),
            None => (String::new(), 0),
        };
        bus.publish(task_id, ProgressSnapshot::paused(PAUSED_MESSAGE, percent));
        debug!(task_id = %task_id, "Runner waiting at pause checkpoint");

        let mut running = self.running.subscribe();
        let mut cancel_signal = cancels.subscribe();
        loop {
            if cancels.is_cancelled(task_id) {
                return Checkpoint::Cancelled;
            }
            if *running.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = running.changed() => {}
                _ = cancel_signal.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if cancels.is_cancelled(task_id) {
            return Checkpoint::Cancelled;
        }
        bus.publish(task_id, ProgressSnapshot::processing(message, percent));
        debug!(task_id = %task_id, "Runner leaving pause checkpoint");
        Checkpoint::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Fixture {
        bus: Arc<ProgressBus>,
        cancels: Arc<CancellationRegistry>,
        gate: Arc<PauseGate>,
        id: TaskId,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(ProgressBus::new(Duration::from_millis(20)));
        let id = TaskId::from("t");
        bus.register(id.clone(), ProgressSnapshot::processing("Analyzing layout", 30))
            .unwrap();
        Fixture {
            cancels: Arc::new(CancellationRegistry::new(Arc::clone(&bus))),
            gate: Arc::new(PauseGate::new(Duration::from_millis(20))),
            bus,
            id,
        }
    }

    #[tokio::test]
    async fn open_gate_proceeds_immediately() {
        let f = fixture();
        let r = f.gate.wait_if_paused(&f.id, &f.bus, &f.cancels).await;
        assert_eq!(r, Checkpoint::Proceed);
        assert_eq!(f.bus.latest(&f.id).unwrap().status, ProgressStatus::Processing);
    }

    #[test]
    fn pause_and_resume_toggle() {
        let gate = PauseGate::new(Duration::from_millis(20));
        assert!(gate.is_running());
        gate.pause();
        gate.pause();
        assert!(!gate.is_running());
        gate.resume();
        assert!(gate.is_running());
    }

    #[tokio::test]
    async fn paused_runner_shows_paused_then_restores() {
        let f = fixture();
        f.gate.pause();

        let waiter = tokio::spawn({
            let (gate, bus, cancels, id) = (
                Arc::clone(&f.gate),
                Arc::clone(&f.bus),
                Arc::clone(&f.cancels),
                f.id.clone(),
            );
            async move { gate.wait_if_paused(&id, &bus, &cancels).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let paused = f.bus.latest(&f.id).unwrap();
        assert_eq!(paused.status, ProgressStatus::Paused);
        assert_eq!(paused.percent, 30);
        assert!(!waiter.is_finished());

        f.gate.resume();
        assert_eq!(waiter.await.unwrap(), Checkpoint::Proceed);
        let resumed = f.bus.latest(&f.id).unwrap();
        assert_eq!(resumed.status, ProgressStatus::Processing);
        assert_eq!(resumed.message, "Analyzing layout");
        assert_eq!(resumed.percent, 30);
    }

    #[tokio::test]
    async fn cancel_while_paused_returns_cancelled() {
        let f = fixture();
        f.gate.pause();

        let waiter = tokio::spawn({
            let (gate, bus, cancels, id) = (
                Arc::clone(&f.gate),
                Arc::clone(&f.bus),
                Arc::clone(&f.cancels),
                f.id.clone(),
            );
            async move { gate.wait_if_paused(&id, &bus, &cancels).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        f.cancels.request_cancel(&f.id);
        assert_eq!(waiter.await.unwrap(), Checkpoint::Cancelled);
        assert_eq!(f.bus.latest(&f.id).unwrap().status, ProgressStatus::Cancelled);
        assert!(!f.gate.is_running(), "cancel must not resume the gate");
    }
}
