//! # slide-rebuild
//!
//! Rebuild flat slide images into editable slides: detect the text with a
//! vision model, erase it from the image, and lay it back out as live text
//! over the clean background.
//!
//! ## Why this crate?
//!
//! Slides exported as images (screenshots, generated decks, scans) cannot be
//! edited. Re-typing them is slow, and plain OCR loses the layout. This crate
//! keeps the look of the original: every text block returns at its position
//! and size, on a background with the original text removed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Analyze     vision model → text blocks on a 0–1000 grid
//!  ├─ 2. Refine      second look to fix boxes and typos (best effort)
//!  ├─ 3. Normalize   pixel boxes, clustered font sizes, keyword exclusion
//!  ├─ 4. Background  inpaint text away, or use a supplied background
//!  └─ 5. Render      HTML page and/or JSON slide deck
//! ```
//!
//! Tasks run concurrently under a resizable cap, can be paused and resumed
//! together, and cancelled one by one. Every task publishes progress
//! snapshots that any number of observers can stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slide_rebuild::{
//!     Collaborators, LlmVisionAnalyzer, LlmVisionConfig, Orchestrator,
//!     OrchestratorConfig, TaskOptions, TaskRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / EDGEQUAKE_LLM_PROVIDER
//!     let vision = Arc::new(LlmVisionAnalyzer::new(LlmVisionConfig::default()));
//!     let orch = Orchestrator::new(
//!         OrchestratorConfig::default(),
//!         Collaborators::with_defaults(vision),
//!     )?;
//!
//!     let id = orch.submit(TaskRequest::reconstruct("slide.png", TaskOptions::default()))?;
//!     let done = orch.wait_for(&id).await?;
//!     println!("{} {:?}", done.status, done.data);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `slide-rebuild` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! slide-rebuild = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod collab;
pub mod config;
pub mod control;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use collab::{
    Collaborators, DetectedLayout, DiffusionInpainter, DocumentRenderer, HtmlRenderer,
    Inpainter, LlmVisionAnalyzer, LlmVisionConfig, MarkupRenderer, RenderRequest,
    SlideDeckRenderer, VisionAnalyzer, VisionRequest,
};
pub use config::{
    OrchestratorConfig, OrchestratorConfigBuilder, OutputFormat, PipelineVariant, TaskOptions,
    TaskOptionsBuilder,
};
pub use control::CancelOutcome;
pub use error::{CollaboratorError, SlideError, StageError};
pub use layout::{LayoutItem, NormalizedBox, PixelBox, RefinementReport, TextStyle};
pub use orchestrator::Orchestrator;
pub use pipeline::runner::Stage;
pub use progress::{ArtifactManifest, ProgressSnapshot, ProgressStatus, ProgressStream};
pub use task::{TaskId, TaskRequest};
