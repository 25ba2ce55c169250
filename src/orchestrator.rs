//! The public facade: submit tasks, observe them, steer them.
//!
//! An [`Orchestrator`] owns the shared control state (progress bus, limiter,
//! pause gate, cancellation registry) and hands a clone of it to every
//! runner it spawns. Submission returns as soon as the task is registered;
//! the pipeline itself runs on the tokio runtime.
//!
//! ```text
//! submit ──▶ validate ──▶ register "starting" ──▶ spawn runner ──▶ TaskId
//!                                                    │
//!                            supervisor ◀────────────┘  (reports panics)
//! ```

use crate::collab::Collaborators;
use crate::config::{OrchestratorConfig, PipelineVariant};
use crate::control::{CancelOutcome, CancellationRegistry, ConcurrencyLimiter, PauseGate};
use crate::error::SlideError;
use crate::pipeline::artifacts::ArtifactStore;
use crate::pipeline::input::{is_url, validate_local_image};
use crate::pipeline::invoker::StageInvoker;
use crate::pipeline::runner::{PipelineRunner, RunnerContext};
use crate::progress::{ProgressBus, ProgressSnapshot, ProgressStream};
use crate::task::{Task, TaskId, TaskRequest};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

const QUEUED_MESSAGE: &str = "Waiting for a free processing slot";

/// Task orchestrator for slide reconstruction.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use slide_rebuild::{
///     Collaborators, LlmVisionAnalyzer, LlmVisionConfig, Orchestrator,
///     OrchestratorConfig, TaskOptions, TaskRequest,
/// };
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let vision = Arc::new(LlmVisionAnalyzer::new(LlmVisionConfig::default()));
/// let orch = Orchestrator::new(
///     OrchestratorConfig::default(),
///     Collaborators::with_defaults(vision),
/// )?;
/// let id = orch.submit(TaskRequest::reconstruct("slide.png", TaskOptions::default()))?;
/// let done = orch.wait_for(&id).await?;
/// println!("{}: {}", done.status, done.message);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    ctx: RunnerContext,
}

impl Orchestrator {
    /// Build an orchestrator and create its output directory.
    ///
    /// The configuration is re-validated here, so hand-built values get
    /// the same checks and clamping as the builder's.
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, SlideError> {
        let config = config.checked()?;
        std::fs::create_dir_all(&config.output_dir).map_err(|source| SlideError::Io {
            path: config.output_dir.clone(),
            source,
        })?;

        let bus = Arc::new(ProgressBus::new(config.poll_interval));
        let ctx = RunnerContext {
            limiter: Arc::new(ConcurrencyLimiter::new(config.max_concurrent)?),
            pause: Arc::new(PauseGate::new(config.poll_interval)),
            cancels: Arc::new(CancellationRegistry::new(Arc::clone(&bus))),
            bus,
            collaborators,
            invoker: StageInvoker::new(config.stage_timeout()),
            store: ArtifactStore::new(config.output_dir.clone()),
        };
        info!(
            output_dir = %config.output_dir.display(),
            max_concurrent = config.max_concurrent,
            "Orchestrator ready"
        );
        Ok(Self { config, ctx })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Validate and enqueue a task. Must be called from within a tokio
    /// runtime.
    ///
    /// Options are captured here; nothing the caller changes afterwards
    /// affects the task. A `max_concurrent` override in the options changes
    /// the limiter before the task is scheduled.
    ///
    /// # Errors
    /// [`SlideError::InvalidConfig`] for malformed options, an unknown
    /// inpainting backend, or a missing local input or background file.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId, SlideError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SlideError::Internal(format!("submit needs a tokio runtime: {e}")))?;
        self.validate(&request)?;

        if let Some(n) = request.options.max_concurrent {
            self.ctx.limiter.set_capacity(n)?;
        }

        let id = TaskId::generate();
        self.ctx
            .bus
            .register(id.clone(), ProgressSnapshot::starting(QUEUED_MESSAGE))?;
        info!(task_id = %id, image = %request.image, "Task submitted");

        let task = Task {
            id: id.clone(),
            request,
        };
        let runner = runtime.spawn(PipelineRunner::new(task, self.ctx.clone()).run());

        let (bus, cancels, supervised) = (
            Arc::clone(&self.ctx.bus),
            Arc::clone(&self.ctx.cancels),
            id.clone(),
        );
        runtime.spawn(async move {
            if let Err(e) = runner.await {
                if e.is_panic() {
                    error!(task_id = %supervised, "Pipeline runner panicked");
                    bus.publish(
                        &supervised,
                        ProgressSnapshot::error("Internal error: pipeline runner panicked"),
                    );
                }
                cancels.clear(&supervised);
            }
        });

        Ok(id)
    }

    fn validate(&self, request: &TaskRequest) -> Result<(), SlideError> {
        let opts = &request.options;
        opts.validate()?;

        match &request.variant {
            PipelineVariant::Reconstruct => {
                if self
                    .ctx
                    .collaborators
                    .inpainter(&opts.inpainting_backend)
                    .is_none()
                {
                    return Err(SlideError::InvalidConfig(format!(
                        "unknown inpainting backend '{}'",
                        opts.inpainting_backend
                    )));
                }
            }
            PipelineVariant::Combine { background } => {
                if !background.is_file() {
                    return Err(SlideError::InvalidConfig(format!(
                        "background file not found: {}",
                        background.display()
                    )));
                }
            }
        }

        if request.image.trim().is_empty() {
            return Err(SlideError::InvalidConfig("image reference is empty".into()));
        }
        if !is_url(&request.image) {
            validate_local_image(Path::new(&request.image))?;
        }
        Ok(())
    }

    // ── Observation ──────────────────────────────────────────────────────

    /// Stream snapshots of a task until its terminal snapshot.
    pub fn stream_progress(&self, task_id: &TaskId) -> Result<ProgressStream, SlideError> {
        self.ctx.bus.subscribe(task_id)
    }

    /// Latest snapshot of a task.
    pub fn snapshot(&self, task_id: &TaskId) -> Result<ProgressSnapshot, SlideError> {
        self.ctx
            .bus
            .latest(task_id)
            .ok_or_else(|| SlideError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Wait for the terminal snapshot of a task.
    pub async fn wait_for(&self, task_id: &TaskId) -> Result<ProgressSnapshot, SlideError> {
        let mut stream = self.stream_progress(task_id)?;
        let mut last = None;
        while let Some(snapshot) = stream.next().await {
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }
            last = Some(snapshot);
        }
        last.map_or_else(|| self.snapshot(task_id), Ok)
    }

    /// Drop finished tasks nobody is watching. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        self.ctx.bus.prune_terminal()
    }

    // ── Control ──────────────────────────────────────────────────────────

    /// Stop every runner at its next checkpoint.
    pub fn pause(&self) {
        self.ctx.pause.pause();
    }

    pub fn resume(&self) {
        self.ctx.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        !self.ctx.pause.is_running()
    }

    /// Cancel a task. Cancelling a finished task is a no-op, including
    /// one already dropped by [`Self::prune_finished`].
    ///
    /// # Errors
    /// [`SlideError::TaskNotFound`] if no such task was ever submitted.
    pub fn cancel(&self, task_id: &TaskId) -> Result<CancelOutcome, SlideError> {
        if self.ctx.bus.was_retired(task_id) {
            return Ok(CancelOutcome::AlreadyFinished);
        }
        if !self.ctx.bus.contains(task_id) {
            return Err(SlideError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        Ok(self.ctx.cancels.request_cancel(task_id))
    }

    /// Change the concurrency cap. Running tasks are never preempted.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), SlideError> {
        self.ctx.limiter.set_capacity(capacity)
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.ctx.limiter
    }
}
