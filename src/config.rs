//! Configuration types for the orchestrator and for individual tasks.
//!
//! Two structs, two lifetimes:
//!
//! * [`OrchestratorConfig`] is fixed when the [`crate::Orchestrator`] is built
//!   (output directory, initial concurrency cap, checkpoint poll interval,
//!   collaborator timeout).
//! * [`TaskOptions`] travels with each submitted task. It is captured once
//!   at submission and read immutably by the pipeline, so changing a
//!   preference while a task runs never affects that task.
//!
//! Both are built through validating builders; a failed `build()` is a
//! [`SlideError::InvalidConfig`].

use crate::error::SlideError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fastest checkpoint polling we allow.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pause, resume and cancel must be observed within a second.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Process-wide configuration for an [`crate::Orchestrator`].
///
/// # Example
/// ```rust
/// use slide_rebuild::OrchestratorConfig;
///
/// let config = OrchestratorConfig::builder()
///     .max_concurrent(4)
///     .output_dir("out")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent, 4);
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Initial concurrency cap. Default: 3.
    ///
    /// Each admitted task holds one slot from admission until its terminal
    /// snapshot, including while paused. Vision calls dominate wall-clock
    /// time, so a small cap keeps rate limits comfortable.
    pub max_concurrent: usize,

    /// Root of every task's output namespace. Default: `output`.
    pub output_dir: PathBuf,

    /// Fallback polling interval for pause/cancel checkpoints and progress
    /// streams. Default: 500 ms. Clamped to 10 ms – 1 s.
    pub poll_interval: Duration,

    /// Upper bound on a single collaborator call in seconds. Default: 300.
    /// `None` lets calls run as long as the collaborator takes.
    pub stage_timeout_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            output_dir: PathBuf::from("output"),
            poll_interval: Duration::from_millis(500),
            stage_timeout_secs: Some(300),
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Validate the fields and clamp `poll_interval` into range.
    ///
    /// [`OrchestratorConfigBuilder::build`] and [`crate::Orchestrator::new`]
    /// both go through here, so a struct literal gets the same checks.
    pub fn checked(mut self) -> Result<Self, SlideError> {
        validate_capacity(self.max_concurrent)?;
        if self.output_dir.as_os_str().is_empty() {
            return Err(SlideError::InvalidConfig(
                "output directory must not be empty".into(),
            ));
        }
        if self.stage_timeout_secs == Some(0) {
            return Err(SlideError::InvalidConfig(
                "stage timeout must be ≥ 1s (use None to disable)".into(),
            ));
        }
        self.poll_interval = self.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        Ok(self)
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.max_concurrent = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn stage_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.stage_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrchestratorConfig, SlideError> {
        self.config.checked()
    }
}

/// Shared capacity rule for the builder, submissions and runtime changes.
pub(crate) fn validate_capacity(n: usize) -> Result<(), SlideError> {
    if n == 0 {
        return Err(SlideError::InvalidConfig(
            "concurrency cap must be ≥ 1, got 0".into(),
        ));
    }
    Ok(())
}

// ── Per-task options ─────────────────────────────────────────────────────

/// Options captured when a task is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Vision backend (model) identifier. Default: `gpt-4.1-nano`.
    pub vision_backend: String,

    /// Inpainting backend identifier, looked up in the registered
    /// collaborators. Default: `diffusion`.
    pub inpainting_backend: String,

    /// Which renderers run. Default: [`OutputFormat::Both`].
    pub output_format: OutputFormat,

    /// New concurrency cap applied when this task is submitted.
    pub max_concurrent: Option<usize>,

    /// Extra comma-separated exclusion keywords, merged with the watermark
    /// token. Case-insensitive, whitespace stripped.
    pub exclude_keywords: Option<String>,

    /// Font family used by both renderers. Default: `Malgun Gothic`.
    pub font_family: String,

    /// Run the best-effort refinement pass. Default: true.
    pub refine_layout: bool,

    /// Sub-directory of the output root that groups related tasks.
    /// Default: `single`.
    pub batch_folder: String,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            vision_backend: "gpt-4.1-nano".to_string(),
            inpainting_backend: "diffusion".to_string(),
            output_format: OutputFormat::default(),
            max_concurrent: None,
            exclude_keywords: None,
            font_family: "Malgun Gothic".to_string(),
            refine_layout: true,
            batch_folder: "single".to_string(),
        }
    }
}

impl TaskOptions {
    pub fn builder() -> TaskOptionsBuilder {
        TaskOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Check the options that do not depend on registered collaborators.
    pub fn validate(&self) -> Result<(), SlideError> {
        if self.vision_backend.trim().is_empty() {
            return Err(SlideError::InvalidConfig(
                "vision backend must not be empty".into(),
            ));
        }
        if self.inpainting_backend.trim().is_empty() {
            return Err(SlideError::InvalidConfig(
                "inpainting backend must not be empty".into(),
            ));
        }
        if self.font_family.trim().is_empty() {
            return Err(SlideError::InvalidConfig(
                "font family must not be empty".into(),
            ));
        }
        if let Some(n) = self.max_concurrent {
            validate_capacity(n)?;
        }
        validate_batch_folder(&self.batch_folder)
    }
}

/// The batch folder becomes a single path component under the output root.
fn validate_batch_folder(name: &str) -> Result<(), SlideError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(SlideError::InvalidConfig(format!(
            "batch folder '{name}' must be a single non-empty path component"
        )));
    }
    Ok(())
}

/// Builder for [`TaskOptions`].
#[derive(Debug)]
pub struct TaskOptionsBuilder {
    options: TaskOptions,
}

impl TaskOptionsBuilder {
    pub fn vision_backend(mut self, name: impl Into<String>) -> Self {
        self.options.vision_backend = name.into();
        self
    }

    pub fn inpainting_backend(mut self, name: impl Into<String>) -> Self {
        self.options.inpainting_backend = name.into();
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.options.output_format = format;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.options.max_concurrent = Some(n);
        self
    }

    pub fn exclude_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.options.exclude_keywords = Some(keywords.into());
        self
    }

    pub fn font_family(mut self, font: impl Into<String>) -> Self {
        self.options.font_family = font.into();
        self
    }

    pub fn refine_layout(mut self, v: bool) -> Self {
        self.options.refine_layout = v;
        self
    }

    pub fn batch_folder(mut self, name: impl Into<String>) -> Self {
        self.options.batch_folder = name.into();
        self
    }

    pub fn build(self) -> Result<TaskOptions, SlideError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which rendering collaborators run for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// HTML markup only.
    Markup,
    /// Slide deck document only.
    Document,
    /// Both renderers. (default)
    #[default]
    Both,
}

impl OutputFormat {
    pub fn wants_markup(self) -> bool {
        matches!(self, Self::Markup | Self::Both)
    }

    pub fn wants_document(self) -> bool {
        matches!(self, Self::Document | Self::Both)
    }
}

/// The two pipeline variants share one state machine; they differ only in
/// how the background is produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineVariant {
    /// Erase detected text from the source image by inpainting. (default)
    #[default]
    Reconstruct,
    /// Use a caller-supplied clean background, resized to the source size.
    Combine { background: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_defaults_are_valid() {
        let c = OrchestratorConfig::builder().build().unwrap();
        assert_eq!(c.max_concurrent, 3);
        assert_eq!(c.poll_interval, Duration::from_millis(500));
        assert_eq!(c.stage_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = OrchestratorConfig::builder()
            .max_concurrent(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SlideError::InvalidConfig(_)));
    }

    #[test]
    fn poll_interval_is_clamped_to_one_second() {
        let c = OrchestratorConfig::builder()
            .poll_interval(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(c.poll_interval, Duration::from_secs(1));

        let c = OrchestratorConfig::builder()
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(c.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn zero_stage_timeout_is_rejected() {
        assert!(OrchestratorConfig::builder()
            .stage_timeout_secs(Some(0))
            .build()
            .is_err());
        assert!(OrchestratorConfig::builder()
            .stage_timeout_secs(None)
            .build()
            .is_ok());
    }

    #[test]
    fn struct_literal_is_checked_like_the_builder() {
        let c = OrchestratorConfig {
            poll_interval: Duration::from_secs(5),
            ..OrchestratorConfig::default()
        }
        .checked()
        .unwrap();
        assert_eq!(c.poll_interval, MAX_POLL_INTERVAL);

        let bad = OrchestratorConfig {
            stage_timeout_secs: Some(0),
            ..OrchestratorConfig::default()
        };
        assert!(matches!(bad.checked(), Err(SlideError::InvalidConfig(_))));
    }

    #[test]
    fn task_options_builder_validates() {
        let opts = TaskOptions::builder()
            .vision_backend("gemini-2.0-flash")
            .output_format(OutputFormat::Markup)
            .exclude_keywords("Draft, Confidential")
            .build()
            .unwrap();
        assert_eq!(opts.vision_backend, "gemini-2.0-flash");
        assert!(opts.output_format.wants_markup());
        assert!(!opts.output_format.wants_document());

        assert!(TaskOptions::builder().max_concurrent(0).build().is_err());
        assert!(TaskOptions::builder().vision_backend("  ").build().is_err());
        assert!(TaskOptions::builder().font_family("").build().is_err());
    }

    #[test]
    fn batch_folder_must_be_one_component() {
        for bad in ["", ".", "..", "a/b", "a\\b", "../escape"] {
            assert!(
                TaskOptions::builder().batch_folder(bad).build().is_err(),
                "{bad:?} should be rejected"
            );
        }
        assert!(TaskOptions::builder().batch_folder("deck_01").build().is_ok());
    }

    #[test]
    fn output_format_serialises_lowercase() {
        let json = serde_json::to_string(&OutputFormat::Document).unwrap();
        assert_eq!(json, "\"document\"");
    }
}
