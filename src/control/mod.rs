//! Shared control state consulted by every runner.
//!
//! * [`limiter`]: how many runners may be past admission
//! * [`pause`]:   process-wide pause switch, checked between stages
//! * [`cancel`]:  per-task cancellation requests

pub mod cancel;
pub mod limiter;
pub mod pause;

pub use cancel::{CancelOutcome, CancellationRegistry, CANCELLED_MESSAGE};
pub use limiter::{AdmissionPermit, ConcurrencyLimiter};
pub use pause::{Checkpoint, PauseGate};
