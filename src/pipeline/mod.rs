//! Pipeline execution for a single task.
//!
//! Each submodule covers one concern of running a task. The state machine
//! in [`runner`] ties them together; everything else is a helper it calls.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ vision ──▶ layout ──▶ background ──▶ renderers ──▶ artifacts
//! (URL/path) (collab)  (pure)     (mask/resize)   (collab)      (disk)
//! ```
//!
//! 1. [`input`]:      canonicalise the submitted path or URL to a local file
//! 2. [`encode`]:     PNG + base64 for vision requests and data URIs
//! 3. [`background`]: text mask construction and supplied-background resize
//! 4. [`artifacts`]:  the task's private output directory
//! 5. [`invoker`]:    timeout, blocking-pool offload and error attribution
//!    for every collaborator call
//! 6. [`runner`]:     the stage state machine with pause/cancel checkpoints

pub mod artifacts;
pub mod background;
pub mod encode;
pub mod input;
pub mod invoker;
pub mod runner;
