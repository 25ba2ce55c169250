//! The per-task state machine.
//!
//! One [`PipelineRunner`] drives one task from admission to a terminal
//! snapshot:
//!
//! ```text
//! queued ─▶ Admitted ─▶ AnalyzingLayout ─▶ RefiningLayout ─▶ NormalizingLayout
//!                                                                 │
//!          Complete ◀─ RenderingOutputs ◀─ ProducingBackground ◀──┘
//! ```
//!
//! Before every stage the runner passes a checkpoint: it stops if the task
//! was cancelled, waits while the pause gate is closed, then publishes the
//! stage's `processing` snapshot. A collaborator call in flight is never
//! interrupted; a cancel requested during it is seen at the next checkpoint,
//! and the task keeps its admission slot until then.
//!
//! The two pipeline variants share this machine and differ only inside
//! `ProducingBackground`: reconstruct inpaints the source, combine resizes
//! a caller-supplied background.
//!
//! Exactly one terminal snapshot is published per task: `complete` or
//! `error` by the runner, `cancelled` by whoever requested cancellation.

use super::artifacts::{
    ArtifactStore, TaskArtifacts, BACKGROUND_FILE, LAYOUT_FILE, LAYOUT_FILTERED_FILE,
};
use super::background::{build_text_mask, fit_background, load_rgb};
use super::input::resolve_input;
use super::invoker::StageInvoker;
use crate::collab::{Collaborators, RenderRequest, VisionRequest};
use crate::config::PipelineVariant;
use crate::control::{CancellationRegistry, Checkpoint, ConcurrencyLimiter, PauseGate};
use crate::error::{CollaboratorError, StageError};
use crate::layout::{
    convert_to_pixels, diff_refinement, normalize_font_sizes, ExclusionFilter, LayoutItem,
    RefinementReport,
};
use crate::progress::{ArtifactManifest, ProgressBus, ProgressSnapshot, Publish};
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

// ── Stages ───────────────────────────────────────────────────────────────

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Admitted,
    AnalyzingLayout,
    RefiningLayout,
    NormalizingLayout,
    ProducingBackground,
    RenderingOutputs,
    Complete,
}

impl Stage {
    /// Percent published when the stage starts.
    pub fn percent(self) -> u8 {
        match self {
            Stage::Admitted => 5,
            Stage::AnalyzingLayout => 10,
            Stage::RefiningLayout => 30,
            Stage::NormalizingLayout => 45,
            Stage::ProducingBackground => 60,
            Stage::RenderingOutputs => 80,
            Stage::Complete => 100,
        }
    }

    /// Message published when the stage starts.
    pub fn message(self) -> &'static str {
        match self {
            Stage::Admitted => "Task admitted",
            Stage::AnalyzingLayout => "Analyzing layout",
            Stage::RefiningLayout => "Refining layout",
            Stage::NormalizingLayout => "Normalizing fonts and filtering text",
            Stage::ProducingBackground => "Producing clean background",
            Stage::RenderingOutputs => "Rendering outputs",
            Stage::Complete => "Processing complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Admitted => "admission",
            Stage::AnalyzingLayout => "analyzing layout",
            Stage::RefiningLayout => "refining layout",
            Stage::NormalizingLayout => "normalizing layout",
            Stage::ProducingBackground => "producing background",
            Stage::RenderingOutputs => "rendering outputs",
            Stage::Complete => "completion",
        })
    }
}

/// Percent published while the document renderer runs.
const DOCUMENT_PERCENT: u8 = 90;

/// Why a runner stopped before completing.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Failed(StageError),
}

impl From<StageError> for Interrupt {
    fn from(e: StageError) -> Self {
        Interrupt::Failed(e)
    }
}

// ── Shared context ───────────────────────────────────────────────────────

/// State shared by every runner of one orchestrator.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub bus: Arc<ProgressBus>,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub pause: Arc<PauseGate>,
    pub cancels: Arc<CancellationRegistry>,
    pub collaborators: Collaborators,
    pub invoker: StageInvoker,
    pub store: ArtifactStore,
}

// ── Runner ───────────────────────────────────────────────────────────────

pub struct PipelineRunner {
    task: Task,
    ctx: RunnerContext,
}

impl PipelineRunner {
    pub fn new(task: Task, ctx: RunnerContext) -> Self {
        Self { task, ctx }
    }

    /// Drive the task to a terminal state.
    ///
    /// Holds an admission slot from admission until the terminal snapshot
    /// has been published, including while paused.
    pub async fn run(self) {
        let span = info_span!("task", task_id = %self.task.id);
        async move {
            let id = &self.task.id;
            let permit = tokio::select! {
                biased;
                _ = self.ctx.cancels.cancelled(id) => {
                    info!("Cancelled while waiting for admission");
                    self.ctx.cancels.clear(id);
                    return;
                }
                permit = self.ctx.limiter.admit() => permit,
            };

            match self.execute().await {
                Ok(manifest) => {
                    self.log_execution_record(&manifest);
                    let done = ProgressSnapshot::complete(Stage::Complete.message(), manifest);
                    if self.ctx.bus.publish(id, done) == Publish::Terminal {
                        info!("Finished after cancellation; result discarded");
                    }
                }
                Err(Interrupt::Cancelled) => {
                    info!("Stopped at checkpoint after cancellation");
                }
                Err(Interrupt::Failed(e)) => {
                    error!(stage = %e.stage, "{}", e.message);
                    self.ctx
                        .bus
                        .publish(id, ProgressSnapshot::error(e.message));
                }
            }

            self.ctx.cancels.clear(id);
            drop(permit);
        }
        .instrument(span)
        .await
    }

    async fn execute(&self) -> Result<ArtifactManifest, Interrupt> {
        let opts = &self.task.request.options;
        let artifacts = self
            .ctx
            .store
            .for_task(&opts.batch_folder, &self.task.id);

        // ── Admitted ─────────────────────────────────────────────────────
        self.checkpoint(Stage::Admitted).await?;
        self.collaborate(Stage::Admitted, artifacts.create()).await?;

        // ── AnalyzingLayout ──────────────────────────────────────────────
        self.checkpoint(Stage::AnalyzingLayout).await?;
        let timeout = self.ctx.invoker.timeout();
        let input = self
            .collaborate(
                Stage::AnalyzingLayout,
                resolve_input(&self.task.request.image, timeout),
            )
            .await?;
        let vision_request = VisionRequest {
            image: input.path().to_path_buf(),
            backend: opts.vision_backend.clone(),
        };
        let vision = Arc::clone(&self.ctx.collaborators.vision);
        let detected = self
            .collaborate(Stage::AnalyzingLayout, vision.detect_layout(&vision_request))
            .await?;
        let (width, height) = (detected.width, detected.height);
        debug!(items = detected.items.len(), width, height, "Layout detected");

        // ── RefiningLayout ───────────────────────────────────────────────
        self.checkpoint(Stage::RefiningLayout).await?;
        let (mut items, refinement) = if opts.refine_layout {
            self.refine(&vision_request, detected.items).await?
        } else {
            debug!("Refinement disabled");
            (detected.items, None)
        };

        // ── NormalizingLayout ────────────────────────────────────────────
        self.checkpoint(Stage::NormalizingLayout).await?;
        convert_to_pixels(&mut items, width, height);
        normalize_font_sizes(&mut items, width);
        let views = ExclusionFilter::new(opts.exclude_keywords.as_deref()).split(items);
        info!(
            items = views.full.len(),
            excluded = views.excluded(),
            "Layout normalized"
        );
        let layout = self
            .collaborate(
                Stage::NormalizingLayout,
                artifacts.write_json(LAYOUT_FILE, &views.full),
            )
            .await?;
        let layout_filtered = self
            .collaborate(
                Stage::NormalizingLayout,
                artifacts.write_json(LAYOUT_FILTERED_FILE, &views.filtered),
            )
            .await?;

        // ── ProducingBackground ──────────────────────────────────────────
        self.checkpoint(Stage::ProducingBackground).await?;
        let full = Arc::new(views.full);
        let background = self
            .produce_background(&artifacts, &vision_request.image, &full, width, height)
            .await?;

        // ── RenderingOutputs ─────────────────────────────────────────────
        self.checkpoint(Stage::RenderingOutputs).await?;
        let request = RenderRequest {
            items: Arc::new(views.filtered),
            width,
            height,
            background: artifacts.path(BACKGROUND_FILE),
            font_family: opts.font_family.clone(),
            output: artifacts.clone(),
        };

        let markup = if opts.output_format.wants_markup() {
            let renderer = Arc::clone(&self.ctx.collaborators.markup);
            let req = request.clone();
            Some(
                self.collaborate_blocking(Stage::RenderingOutputs, move || {
                    renderer.render_markup(&req)
                })
                .await?,
            )
        } else {
            None
        };

        let document = if opts.output_format.wants_document() {
            let step = ProgressSnapshot::processing("Building slide document", DOCUMENT_PERCENT);
            if self.ctx.bus.publish(&self.task.id, step) != Publish::Accepted {
                return Err(Interrupt::Cancelled);
            }
            let renderer = Arc::clone(&self.ctx.collaborators.document);
            let req = request.clone();
            match self
                .collaborate_blocking(Stage::RenderingOutputs, move || {
                    renderer.render_document(&req)
                })
                .await
            {
                Ok(path) => Some(path),
                Err(Interrupt::Failed(e)) => {
                    warn!("Document rendering failed, continuing without it: {}", e.message);
                    None
                }
                Err(Interrupt::Cancelled) => return Err(Interrupt::Cancelled),
            }
        } else {
            None
        };

        Ok(ArtifactManifest {
            background,
            markup,
            document,
            layout,
            layout_filtered,
            width,
            height,
            items: full.len(),
            rendered_items: request.items.len(),
            refinement,
        })
    }

    /// Best-effort refinement. A failure keeps the initial layout.
    async fn refine(
        &self,
        request: &VisionRequest,
        initial: Vec<LayoutItem>,
    ) -> Result<(Vec<LayoutItem>, Option<RefinementReport>), Interrupt> {
        let vision = Arc::clone(&self.ctx.collaborators.vision);
        match self
            .collaborate(Stage::RefiningLayout, vision.refine_layout(request, &initial))
            .await
        {
            Ok(refined) => {
                let report = diff_refinement(&initial, &refined);
                info!(
                    blocks = report.refined_items,
                    text_corrections = report.text_corrections,
                    box_adjustments = report.box_adjustments,
                    mismatched = report.mismatched,
                    "Layout refined"
                );
                for line in &report.details {
                    info!("   - {line}");
                }
                Ok((refined, Some(report)))
            }
            Err(Interrupt::Failed(e)) => {
                warn!("Refinement failed, keeping initial layout: {}", e.message);
                Ok((initial, None))
            }
            Err(Interrupt::Cancelled) => Err(Interrupt::Cancelled),
        }
    }

    async fn produce_background(
        &self,
        artifacts: &TaskArtifacts,
        source: &Path,
        full: &Arc<Vec<LayoutItem>>,
        width: u32,
        height: u32,
    ) -> Result<PathBuf, Interrupt> {
        let target = artifacts.path(BACKGROUND_FILE);
        match &self.task.request.variant {
            PipelineVariant::Reconstruct => {
                let backend = &self.task.request.options.inpainting_backend;
                let inpainter = self.ctx.collaborators.inpainter(backend).ok_or_else(|| {
                    StageError::new(
                        Stage::ProducingBackground,
                        format!("unknown inpainting backend '{backend}'"),
                    )
                })?;
                let (source, items) = (source.to_path_buf(), Arc::clone(full));
                self.collaborate_blocking(Stage::ProducingBackground, move || {
                    let image = load_rgb(&source)?;
                    let (w, h) = image.dimensions();
                    let mask = build_text_mask(&items, w, h);
                    let clean = inpainter.clean_background(&image, &mask)?;
                    clean.save(&target)?;
                    Ok(())
                })
                .await?;
            }
            PipelineVariant::Combine { background } => {
                let background = background.clone();
                self.collaborate_blocking(Stage::ProducingBackground, move || {
                    let supplied = load_rgb(&background)?;
                    fit_background(&supplied, width, height).save(&target)?;
                    Ok(())
                })
                .await?;
            }
        }
        Ok(artifacts.relative(BACKGROUND_FILE))
    }

    // ── Checkpoints and guarded calls ────────────────────────────────────

    /// Stop if cancelled, wait while paused, then announce `stage`.
    async fn checkpoint(&self, stage: Stage) -> Result<(), Interrupt> {
        let id = &self.task.id;
        let gate = self
            .ctx
            .pause
            .wait_if_paused(id, &self.ctx.bus, &self.ctx.cancels)
            .await;
        if gate == Checkpoint::Cancelled {
            return Err(Interrupt::Cancelled);
        }
        let snapshot = ProgressSnapshot::processing(stage.message(), stage.percent());
        match self.ctx.bus.publish(id, snapshot) {
            Publish::Accepted => {
                debug!(%stage, "Stage started");
                Ok(())
            }
            // Someone else already ended the task.
            Publish::Terminal | Publish::Unknown => Err(Interrupt::Cancelled),
        }
    }

    /// Invoke an async collaborator.
    ///
    /// The call is never interrupted by a cancel request; the next
    /// [`Self::checkpoint`] observes it.
    async fn collaborate<T, F>(&self, stage: Stage, fut: F) -> Result<T, Interrupt>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        self.ctx
            .invoker
            .call(stage, fut)
            .await
            .map_err(Interrupt::Failed)
    }

    /// Blocking-pool variant of [`Self::collaborate`].
    async fn collaborate_blocking<T, F>(&self, stage: Stage, f: F) -> Result<T, Interrupt>
    where
        F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
        T: Send + 'static,
    {
        self.ctx
            .invoker
            .call_blocking(stage, f)
            .await
            .map_err(Interrupt::Failed)
    }

    fn log_execution_record(&self, manifest: &ArtifactManifest) {
        let req = &self.task.request;
        let variant = match req.variant {
            PipelineVariant::Reconstruct => "reconstruct",
            PipelineVariant::Combine { .. } => "combine",
        };
        info!(
            image = %req.image,
            variant,
            vision_backend = %req.options.vision_backend,
            inpainting_backend = %req.options.inpainting_backend,
            format = ?req.options.output_format,
            items = manifest.items,
            rendered = manifest.rendered_items,
            "Execution record"
        );
    }
}
