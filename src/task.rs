//! Task identity and the immutable request a task carries through the pipeline.

use crate::config::{PipelineVariant, TaskOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque task identifier, generated at submission and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an existing identifier (e.g. one received from a client).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a caller submits: an image reference, a variant and its options.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Local image path or HTTP/HTTPS URL.
    pub image: String,
    pub variant: PipelineVariant,
    pub options: TaskOptions,
}

impl TaskRequest {
    /// Full reconstruction: detect, inpaint, render.
    pub fn reconstruct(image: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            image: image.into(),
            variant: PipelineVariant::Reconstruct,
            options,
        }
    }

    /// Combine mode: detect and render over a caller-supplied background.
    pub fn combine(
        image: impl Into<String>,
        background: impl Into<std::path::PathBuf>,
        options: TaskOptions,
    ) -> Self {
        Self {
            image: image.into(),
            variant: PipelineVariant::Combine {
                background: background.into(),
            },
            options,
        }
    }
}

/// A submitted task, owned by the one runner executing it.
///
/// Options are a snapshot taken at submission; nothing re-reads settings
/// once the pipeline has started.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub request: TaskRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn combine_request_carries_background() {
        let req = TaskRequest::combine("slide.png", "bg.png", TaskOptions::default());
        match req.variant {
            PipelineVariant::Combine { background } => {
                assert_eq!(background, std::path::PathBuf::from("bg.png"))
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }
}
