//! Error types for the slide-rebuild library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`SlideError`], **rejected at the API boundary**: the request cannot
//!   be accepted at all (invalid capacity, malformed options, unknown task
//!   identifier). Returned synchronously as `Err(SlideError)`; no task is
//!   created.
//!
//! * [`CollaboratorError`], **raised by an external collaborator**: the
//!   vision backend, inpainter or a renderer failed. Collaborator
//!   implementations return it; they never see pipeline state.
//!
//! * [`StageError`], **a collaborator failure attributed to a stage**. The
//!   [`crate::pipeline::invoker::StageInvoker`] wraps every
//!   [`CollaboratorError`] into one. The runner turns it into the task's
//!   terminal `error` snapshot, with [`StageError::message`] shown verbatim
//!   to observers.
//!
//! Cancellation is not an error: it ends a task with the terminal
//! `cancelled` status and never surfaces through these types.

use crate::pipeline::runner::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned synchronously by the public API.
#[derive(Debug, Error)]
pub enum SlideError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed, or the submitted options are malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No task with this identifier was ever submitted (or it was pruned).
    #[error("Unknown task '{task_id}'")]
    TaskNotFound { task_id: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The output directory could not be created.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The backend rejected the call or could not be reached.
    #[error("{backend} backend error: {detail}")]
    Backend { backend: String, detail: String },

    /// The backend answered, but not with something we can use.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Decoding, encoding or resizing an image failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Downloading a remote input failed.
    #[error("Failed to download '{url}': {reason}")]
    Download { url: String, reason: String },

    /// The call did not finish within the configured stage timeout.
    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// A collaborator failure attributed to the pipeline stage that invoked it.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    /// Stage whose collaborator call failed.
    pub stage: Stage,
    /// Raw failure message, surfaced unchanged in the terminal snapshot.
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn from_collaborator(stage: Stage, err: CollaboratorError) -> Self {
        Self::new(stage, err.to_string())
    }
}
