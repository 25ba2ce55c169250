//! Input resolution: normalise a submitted image reference to a local file.
//!
//! Collaborators only ever see local paths. A URL is downloaded into a
//! `TempDir` owned by the returned [`ResolvedInput`], so the file lives
//! exactly as long as the runner needs it and is removed on drop, even when
//! the runner stops early after a cancellation.
//!
//! Local paths are checked twice: once at submission
//! ([`validate_local_image`]), so a typo is rejected before a task exists,
//! and again here in case the file vanished while the task was queued.

use crate::error::{CollaboratorError, SlideError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the image sits in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the image regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Submission-time check of a local image path.
pub fn validate_local_image(path: &Path) -> Result<(), SlideError> {
    if !path.is_file() {
        return Err(SlideError::InvalidConfig(format!(
            "image file not found: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Resolve the reference to a local image path, downloading if needed.
pub async fn resolve_input(
    input: &str,
    timeout: Option<Duration>,
) -> Result<ResolvedInput, CollaboratorError> {
    if is_url(input) {
        download_url(input, timeout).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, CollaboratorError> {
    let path = PathBuf::from(path_str);
    if !path.is_file() {
        return Err(CollaboratorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("image file not found: {}", path.display()),
        )));
    }
    debug!("Resolved local image: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(
    url: &str,
    timeout: Option<Duration>,
) -> Result<ResolvedInput, CollaboratorError> {
    info!("Downloading image from: {}", url);
    let fail = |reason: String| CollaboratorError::Download {
        url: url.to_string(),
        reason,
    };

    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    let client = builder.build().map_err(|e| fail(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            CollaboratorError::Timeout {
                secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }
        } else {
            fail(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    let format = image::guess_format(&bytes)
        .map_err(|_| fail("response is not a recognised image".to_string()))?;

    let temp_dir = TempDir::new()?;
    let ext = format.extensions_str().first().copied().unwrap_or("img");
    let file_path = temp_dir.path().join(format!("{}.{ext}", file_stem(url)));
    tokio::fs::write(&file_path, &bytes).await?;

    info!("Downloaded to: {}", file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Reasonable file stem from the last URL path segment.
fn file_stem(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_owned))
        })
        .and_then(|last| {
            Path::new(&last)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "downloaded".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/slide.png"));
        assert!(is_url("http://example.com/slide.png"));
        assert!(!is_url("/tmp/slide.png"));
        assert!(!is_url("slide.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn file_stem_from_url() {
        assert_eq!(file_stem("https://x.test/decks/slide_03.png"), "slide_03");
        assert_eq!(file_stem("https://x.test/"), "downloaded");
        assert_eq!(file_stem("not a url"), "downloaded");
    }

    #[test]
    fn missing_local_file_is_rejected() {
        let err = validate_local_image(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, SlideError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn local_file_resolves_to_itself() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_string_lossy().into_owned();
        let resolved = resolve_input(&path, None).await.unwrap();
        assert_eq!(resolved.path(), tmp.path());
    }
}
