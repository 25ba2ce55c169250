//! Uniform wrapper around collaborator calls.
//!
//! Every call a runner makes to the outside world goes through a
//! [`StageInvoker`], which:
//!
//! 1. attributes failures to the calling [`Stage`] as a [`StageError`];
//! 2. enforces the optional per-call timeout;
//! 3. moves synchronous collaborators onto tokio's blocking pool, since
//!    image work would otherwise stall the reactor for every other task.
//!
//! The raw collaborator message is kept intact in [`StageError::message`].

use super::runner::Stage;
use crate::error::{CollaboratorError, StageError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct StageInvoker {
    timeout: Option<Duration>,
}

impl StageInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Await an async collaborator call.
    pub async fn call<T, F>(&self, stage: Stage, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_) => {
                    warn!(%stage, secs = limit.as_secs(), "Collaborator call timed out");
                    Err(CollaboratorError::Timeout {
                        secs: limit.as_secs(),
                    })
                }
            },
            None => fut.await,
        };
        result.map_err(|e| StageError::from_collaborator(stage, e))
    }

    /// Run a synchronous collaborator call on the blocking pool.
    ///
    /// A blocking closure cannot be interrupted. On timeout the error is
    /// still reported, but only after the closure has returned, so the
    /// caller's admission slot covers all the work it started.
    pub async fn call_blocking<T, F>(&self, stage: Stage, f: F) -> Result<T, StageError>
    where
        F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::task::spawn_blocking(f);
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        %stage,
                        secs = limit.as_secs(),
                        "Collaborator call timed out; waiting for worker"
                    );
                    let _ = handle.await;
                    return Err(StageError::from_collaborator(
                        stage,
                        CollaboratorError::Timeout {
                            secs: limit.as_secs(),
                        },
                    ));
                }
            },
            None => handle.await,
        };
        joined
            .map_err(|e| CollaboratorError::Backend {
                backend: "worker".into(),
                detail: if e.is_panic() {
                    "collaborator panicked".into()
                } else {
                    e.to_string()
                },
            })
            .and_then(|r| r)
            .map_err(|e| StageError::from_collaborator(stage, e))
    }
}
