//! Live task progress: snapshots, the process-wide bus, and observer streams.
//!
//! Every task owns one entry in the [`ProgressBus`]. The entry holds only the
//! latest [`ProgressSnapshot`] (last write wins, no history). Observers call
//! [`ProgressBus::subscribe`] and receive a stream that emits on every change
//! and at least once per poll interval, and ends right after a terminal
//! snapshot.
//!
//! # Why `watch` channels?
//!
//! A `tokio::sync::watch` channel per task is exactly "latest value plus
//! change notification": writers overwrite, any number of readers see the
//! newest value, and a late subscriber still reads the current state. Fan-out
//! comes for free, so every subscriber sees the same terminal snapshot.
//!
//! # Terminal snapshots are final
//!
//! Once an entry holds `complete`, `error` or `cancelled`, every further
//! [`ProgressBus::publish`] for that task is rejected with
//! [`Publish::Terminal`]. Exactly one terminal snapshot is ever stored, no
//! matter how a cancel request and a finishing runner interleave.

use crate::error::SlideError;
use crate::layout::RefinementReport;
use crate::task::TaskId;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::Stream;
use tracing::debug;

/// A boxed stream of progress snapshots for one task.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressSnapshot> + Send>>;

/// Lifecycle status carried by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Submitted, waiting for a concurrency slot or the first checkpoint.
    Starting,
    Processing,
    /// Blocked at a checkpoint by the global pause gate.
    Paused,
    Complete,
    Error,
    Cancelled,
}

impl ProgressStatus {
    /// `complete`, `error` and `cancelled` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable progress record, serialised as `{status, message, percent, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: ProgressStatus,
    pub message: String,
    /// 0–100; never decreases while the task is processing.
    pub percent: u8,
    /// Artifact manifest, present only on `complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ArtifactManifest>,
}

impl ProgressSnapshot {
    fn with(status: ProgressStatus, message: impl Into<String>, percent: u8) -> Self {
        Self {
            status,
            message: message.into(),
            percent: percent.min(100),
            data: None,
        }
    }

    pub fn starting(message: impl Into<String>) -> Self {
        Self::with(ProgressStatus::Starting, message, 0)
    }

    pub fn processing(message: impl Into<String>, percent: u8) -> Self {
        Self::with(ProgressStatus::Processing, message, percent)
    }

    pub fn paused(message: impl Into<String>, percent: u8) -> Self {
        Self::with(ProgressStatus::Paused, message, percent)
    }

    pub fn complete(message: impl Into<String>, manifest: ArtifactManifest) -> Self {
        Self {
            data: Some(manifest),
            ..Self::with(ProgressStatus::Complete, message, 100)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with(ProgressStatus::Error, message, 0)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with(ProgressStatus::Cancelled, message, 0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Locations of everything a completed task produced.
///
/// Paths are relative to the orchestrator's output directory and live
/// under `<batch_folder>/<task_id>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub background: PathBuf,
    pub markup: Option<PathBuf>,
    /// `None` when the format skipped it or the document renderer failed.
    pub document: Option<PathBuf>,
    pub layout: PathBuf,
    pub layout_filtered: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Items in the full view.
    pub items: usize,
    /// Items in the filtered view, i.e. what the renderers received.
    pub rendered_items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<RefinementReport>,
}

/// Result of [`ProgressBus::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Accepted,
    /// The task already reached a terminal snapshot; nothing changed.
    Terminal,
    /// No task with this identifier is registered.
    Unknown,
}

/// Process-wide map from task identifier to its latest snapshot.
#[derive(Debug)]
pub struct ProgressBus {
    entries: RwLock<HashMap<TaskId, watch::Sender<ProgressSnapshot>>>,
    /// Identifiers dropped by [`Self::prune_terminal`].
    retired: Mutex<HashSet<TaskId>>,
    poll_interval: Duration,
}

impl ProgressBus {
    /// `poll_interval` bounds the gap between two emitted snapshots.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
            poll_interval,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, watch::Sender<ProgressSnapshot>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, watch::Sender<ProgressSnapshot>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the entry for a newly submitted task.
    pub fn register(&self, task_id: TaskId, initial: ProgressSnapshot) -> Result<(), SlideError> {
        let mut entries = self.write();
        if entries.contains_key(&task_id) {
            return Err(SlideError::Internal(format!(
                "task '{task_id}' is already registered"
            )));
        }
        let (tx, _rx) = watch::channel(initial);
        entries.insert(task_id, tx);
        Ok(())
    }

    /// Overwrite the latest snapshot, unless the task is already terminal.
    ///
    /// While a task is processing its percent never goes backwards; a
    /// lower value is raised to the current one.
    pub fn publish(&self, task_id: &TaskId, snapshot: ProgressSnapshot) -> Publish {
        let entries = self.read();
        let Some(tx) = entries.get(task_id) else {
            return Publish::Unknown;
        };

        let mut outcome = Publish::Terminal;
        tx.send_if_modified(|current| {
            if current.status.is_terminal() {
                return false;
            }
            let mut next = snapshot;
            if next.status == ProgressStatus::Processing && next.percent < current.percent {
                next.percent = current.percent;
            }
            *current = next;
            outcome = Publish::Accepted;
            true
        });

        if outcome == Publish::Terminal {
            debug!(task_id = %task_id, "ignoring snapshot published after terminal status");
        }
        outcome
    }

    /// Latest snapshot for a task, if it exists.
    pub fn latest(&self, task_id: &TaskId) -> Option<ProgressSnapshot> {
        self.read().get(task_id).map(|tx| tx.borrow().clone())
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.read().contains_key(task_id)
    }

    /// Whether the task finished and was later pruned.
    pub fn was_retired(&self, task_id: &TaskId) -> bool {
        self.retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(task_id)
    }

    /// Number of tracked tasks, dormant ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Stream a task's snapshots until (and including) its terminal one.
    ///
    /// Each call returns an independent stream that starts with the current
    /// snapshot; calling it again after a stream ended replays the terminal
    /// snapshot once.
    pub fn subscribe(&self, task_id: &TaskId) -> Result<ProgressStream, SlideError> {
        let rx = self
            .read()
            .get(task_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| SlideError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let cursor = Cursor {
            rx,
            interval: self.poll_interval,
            first: true,
            done: false,
        };

        let s = stream::unfold(cursor, |mut c| async move {
            if c.done {
                return None;
            }
            if !c.first {
                // Wake on change, or re-emit the current value once the
                // interval elapses.
                if let Ok(Err(_closed)) = tokio::time::timeout(c.interval, c.rx.changed()).await {
                    c.done = true;
                }
            }
            c.first = false;
            let snapshot = c.rx.borrow_and_update().clone();
            if snapshot.is_terminal() {
                c.done = true;
            }
            Some((snapshot, c))
        });

        Ok(s.boxed())
    }

    /// Drop terminal entries nobody is watching. Returns how many were removed.
    pub fn prune_terminal(&self) -> usize {
        let mut entries = self.write();
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|id, tx| {
            let keep = !(tx.borrow().is_terminal() && tx.receiver_count() == 0);
            if !keep {
                retired.insert(id.clone());
            }
            keep
        });
        before - entries.len()
    }
}

struct Cursor {
    rx: watch::Receiver<ProgressSnapshot>,
    interval: Duration,
    first: bool,
    done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> ProgressBus {
        ProgressBus::new(Duration::from_millis(20))
    }

    fn manifest() -> ArtifactManifest {
        ArtifactManifest {
            background: PathBuf::from("single/t/background.png"),
            markup: Some(PathBuf::from("single/t/slide.html")),
            document: None,
            layout: PathBuf::from("single/t/layout.json"),
            layout_filtered: PathBuf::from("single/t/layout_filtered.json"),
            width: 1000,
            height: 800,
            items: 3,
            rendered_items: 2,
            refinement: None,
        }
    }

    #[test]
    fn publish_to_unknown_task_is_reported() {
        let bus = bus();
        let outcome = bus.publish(&TaskId::from("nope"), ProgressSnapshot::processing("x", 10));
        assert_eq!(outcome, Publish::Unknown);
        assert!(bus.is_empty());
    }

    #[test]
    fn terminal_snapshot_is_final() {
        let bus = bus();
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("queued")).unwrap();

        assert_eq!(
            bus.publish(&id, ProgressSnapshot::complete("done", manifest())),
            Publish::Accepted
        );
        assert_eq!(
            bus.publish(&id, ProgressSnapshot::cancelled("too late")),
            Publish::Terminal
        );
        assert_eq!(
            bus.publish(&id, ProgressSnapshot::processing("late", 90)),
            Publish::Terminal
        );

        let latest = bus.latest(&id).unwrap();
        assert_eq!(latest.status, ProgressStatus::Complete);
        assert_eq!(latest.percent, 100);
        assert!(latest.data.is_some());
    }

    #[test]
    fn processing_percent_never_decreases() {
        let bus = bus();
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("queued")).unwrap();
        bus.publish(&id, ProgressSnapshot::processing("a", 60));
        bus.publish(&id, ProgressSnapshot::processing("b", 30));
        let latest = bus.latest(&id).unwrap();
        assert_eq!(latest.message, "b");
        assert_eq!(latest.percent, 60);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let bus = bus();
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("a")).unwrap();
        assert!(bus.register(id, ProgressSnapshot::starting("b")).is_err());
    }

    #[test]
    fn snapshot_serialises_without_empty_data() {
        let json = serde_json::to_value(ProgressSnapshot::processing("Rendering", 80)).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["percent"], 80);
        assert!(json.get("data").is_none());

        let json = serde_json::to_value(ProgressSnapshot::complete("ok", manifest())).unwrap();
        assert_eq!(json["data"]["width"], 1000);
        assert!(json["data"]["document"].is_null());
    }

    #[tokio::test]
    async fn subscribe_unknown_task_is_not_found() {
        let bus = bus();
        let err = bus.subscribe(&TaskId::from("ghost")).err().unwrap();
        assert!(matches!(err, SlideError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_snapshot() {
        let bus = std::sync::Arc::new(bus());
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("queued")).unwrap();
        let mut stream = bus.subscribe(&id).unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.status, ProgressStatus::Starting);

        let writer = std::sync::Arc::clone(&bus);
        let wid = id.clone();
        tokio::spawn(async move {
            writer.publish(&wid, ProgressSnapshot::processing("work", 50));
            tokio::time::sleep(Duration::from_millis(5)).await;
            writer.publish(&wid, ProgressSnapshot::error("boom"));
        });

        let mut last = first;
        while let Some(s) = stream.next().await {
            last = s;
        }
        assert_eq!(last.status, ProgressStatus::Error);
        assert_eq!(last.message, "boom");
    }

    #[tokio::test]
    async fn idle_stream_re_emits_within_poll_interval() {
        let bus = bus();
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("queued")).unwrap();
        let mut stream = bus.subscribe(&id).unwrap();
        stream.next().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("heartbeat within the poll interval")
            .unwrap();
        assert_eq!(second.status, ProgressStatus::Starting);
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_terminal_snapshot() {
        let bus = bus();
        let id = TaskId::from("t1");
        bus.register(id.clone(), ProgressSnapshot::starting("queued")).unwrap();
        let a = bus.subscribe(&id).unwrap();
        let b = bus.subscribe(&id).unwrap();
        bus.publish(&id, ProgressSnapshot::cancelled("stopped"));

        let last_a = a.collect::<Vec<_>>().await.pop().unwrap();
        let last_b = b.collect::<Vec<_>>().await.pop().unwrap();
        assert_eq!(last_a, last_b);
        assert_eq!(last_a.status, ProgressStatus::Cancelled);
    }

    #[test]
    fn prune_drops_unwatched_terminal_entries() {
        let bus = bus();
        let done = TaskId::from("done");
        let live = TaskId::from("live");
        bus.register(done.clone(), ProgressSnapshot::starting("a")).unwrap();
        bus.register(live.clone(), ProgressSnapshot::starting("b")).unwrap();
        bus.publish(&done, ProgressSnapshot::error("x"));

        assert_eq!(bus.prune_terminal(), 1);
        assert!(!bus.contains(&done));
        assert!(bus.contains(&live));
        assert!(bus.was_retired(&done));
        assert!(!bus.was_retired(&live));
    }
}
