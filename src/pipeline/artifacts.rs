//! Per-task output namespace.
//!
//! Every task writes under `<output_dir>/<batch_folder>/<task_id>/`. Task
//! identifiers are unique, so concurrent tasks never share a directory and
//! never overwrite each other's files. Manifests carry paths relative to
//! the output root.

use crate::error::CollaboratorError;
use crate::task::TaskId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const BACKGROUND_FILE: &str = "background.png";
pub const LAYOUT_FILE: &str = "layout.json";
pub const LAYOUT_FILTERED_FILE: &str = "layout_filtered.json";
pub const MARKUP_FILE: &str = "slide.html";
pub const DOCUMENT_FILE: &str = "slide.deck.json";

/// Root of all task namespaces.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Namespace for one task. Nothing is created until [`TaskArtifacts::create`].
    pub fn for_task(&self, batch_folder: &str, task_id: &TaskId) -> TaskArtifacts {
        TaskArtifacts {
            root: self.root.clone(),
            relative_dir: Path::new(batch_folder).join(task_id.as_str()),
        }
    }
}

/// Output directory of a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskArtifacts {
    root: PathBuf,
    relative_dir: PathBuf,
}

impl TaskArtifacts {
    /// Absolute (root-joined) directory of this task.
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.relative_dir)
    }

    /// Path of `name` relative to the output root, as listed in manifests.
    pub fn relative(&self, name: &str) -> PathBuf {
        self.relative_dir.join(name)
    }

    /// Root-joined path of `name`, for writing.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }

    pub async fn create(&self) -> Result<(), CollaboratorError> {
        let dir = self.dir();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Created task directory {}", dir.display());
        Ok(())
    }

    /// Write pretty-printed JSON and return its relative path.
    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, CollaboratorError> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| CollaboratorError::MalformedResponse(e.to_string()))?;
        tokio::fs::write(self.path(name), json).await?;
        Ok(self.relative(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_namespaced_by_batch_and_task() {
        let store = ArtifactStore::new("/out");
        let a = store.for_task("deck", &TaskId::from("abc"));
        assert_eq!(a.dir(), PathBuf::from("/out/deck/abc"));
        assert_eq!(a.relative(MARKUP_FILE), PathBuf::from("deck/abc/slide.html"));
        assert_eq!(a.path(LAYOUT_FILE), PathBuf::from("/out/deck/abc/layout.json"));
    }

    #[tokio::test]
    async fn write_json_creates_readable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let a = ArtifactStore::new(tmp.path()).for_task("single", &TaskId::from("t1"));
        a.create().await.unwrap();

        let rel = a.write_json(LAYOUT_FILE, &vec![1, 2, 3]).await.unwrap();
        let raw = std::fs::read_to_string(tmp.path().join(&rel)).unwrap();
        let back: Vec<i32> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
