//! Collaborator seams: the external capabilities a runner invokes.
//!
//! The pipeline owns orchestration only. Everything that looks at pixels or
//! writes output formats sits behind one of four traits:
//!
//! | Trait               | Stage                 | Default                |
//! |---------------------|-----------------------|------------------------|
//! | [`VisionAnalyzer`]  | analyze / refine      | [`LlmVisionAnalyzer`]  |
//! | [`Inpainter`]       | produce background    | [`DiffusionInpainter`] |
//! | [`MarkupRenderer`]  | render outputs        | [`HtmlRenderer`]       |
//! | [`DocumentRenderer`]| render outputs        | [`SlideDeckRenderer`]  |
//!
//! The vision analyzer is async because it talks to the network. The other
//! three are CPU- or file-bound and synchronous; the runner moves them onto
//! the blocking pool through the stage invoker.

pub mod document;
pub mod html;
pub mod inpaint;
pub mod vision;

pub use document::SlideDeckRenderer;
pub use html::HtmlRenderer;
pub use inpaint::DiffusionInpainter;
pub use vision::{LlmVisionAnalyzer, LlmVisionConfig};

use crate::error::CollaboratorError;
use crate::layout::LayoutItem;
use crate::pipeline::artifacts::TaskArtifacts;
use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

// ── Requests and results ─────────────────────────────────────────────────

/// Input to the vision analyzer.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// Local image path.
    pub image: PathBuf,
    /// Backend (model) identifier from the task options.
    pub backend: String,
}

/// Output of the detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLayout {
    pub items: Vec<LayoutItem>,
    /// Source image width in pixels.
    pub width: u32,
    /// Source image height in pixels.
    pub height: u32,
}

/// Everything a renderer needs, owned so it can cross into the blocking pool.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Filtered layout view.
    pub items: Arc<Vec<LayoutItem>>,
    pub width: u32,
    pub height: u32,
    /// Root-joined path of the produced background image.
    pub background: PathBuf,
    pub font_family: String,
    /// Where to write; renderers return paths relative to the output root.
    pub output: TaskArtifacts,
}

// ── Traits ───────────────────────────────────────────────────────────────

/// Detects text regions in a slide image.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn detect_layout(
        &self,
        request: &VisionRequest,
    ) -> Result<DetectedLayout, CollaboratorError>;

    /// Second look at the image with the initial layout in hand.
    async fn refine_layout(
        &self,
        request: &VisionRequest,
        initial: &[LayoutItem],
    ) -> Result<Vec<LayoutItem>, CollaboratorError>;
}

/// Regenerates masked pixels (mask value > 0) of a slide image.
pub trait Inpainter: Send + Sync {
    fn clean_background(
        &self,
        image: &RgbImage,
        mask: &GrayImage,
    ) -> Result<RgbImage, CollaboratorError>;
}

/// Produces the markup artifact.
pub trait MarkupRenderer: Send + Sync {
    fn render_markup(&self, request: &RenderRequest) -> Result<PathBuf, CollaboratorError>;
}

/// Produces the slide document artifact.
pub trait DocumentRenderer: Send + Sync {
    fn render_document(&self, request: &RenderRequest) -> Result<PathBuf, CollaboratorError>;
}

// ── Bundle ───────────────────────────────────────────────────────────────

/// The set of collaborators an orchestrator hands to its runners.
#[derive(Clone)]
pub struct Collaborators {
    pub vision: Arc<dyn VisionAnalyzer>,
    /// Inpainters by backend identifier.
    pub inpainters: BTreeMap<String, Arc<dyn Inpainter>>,
    pub markup: Arc<dyn MarkupRenderer>,
    pub document: Arc<dyn DocumentRenderer>,
}

impl Collaborators {
    /// Explicit bundle with no inpainters registered yet.
    pub fn new(
        vision: Arc<dyn VisionAnalyzer>,
        markup: Arc<dyn MarkupRenderer>,
        document: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            vision,
            inpainters: BTreeMap::new(),
            markup,
            document,
        }
    }

    /// The given vision analyzer with the built-in inpainter and renderers.
    pub fn with_defaults(vision: Arc<dyn VisionAnalyzer>) -> Self {
        Self::new(
            vision,
            Arc::new(HtmlRenderer::default()),
            Arc::new(SlideDeckRenderer::default()),
        )
        .with_inpainter(inpaint::BACKEND_ID, Arc::new(DiffusionInpainter::default()))
    }

    pub fn with_inpainter(mut self, id: impl Into<String>, inpainter: Arc<dyn Inpainter>) -> Self {
        self.inpainters.insert(id.into(), inpainter);
        self
    }

    pub fn inpainter(&self, id: &str) -> Option<Arc<dyn Inpainter>> {
        self.inpainters.get(id).cloned()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("inpainters", &self.inpainters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
