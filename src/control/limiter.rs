//! Resizable admission limiter for task runners.
//!
//! Caps how many runners may be past admission at once. Slots are permits
//! of a tokio [`Semaphore`]; unlike a plain semaphore the cap can change at
//! runtime:
//!
//! * Raising it adds permits, which admits waiters immediately.
//! * Lowering it never preempts. Free permits are forgotten right away;
//!   the rest of the reduction is recorded as a deficit and paid off by
//!   forgetting permits as admitted runners release them.
//!
//! Admission order among waiters follows the semaphore's FIFO queue.
//!
//! # Usage
//!
//! ```ignore
//! let limiter = Arc::new(ConcurrencyLimiter::new(3)?);
//! let _permit = limiter.admit().await;
//! // pipeline runs here; the slot is released when `_permit` drops
//! ```

use crate::config::validate_capacity;
use crate::error::SlideError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

#[derive(Debug)]
struct Sizing {
    capacity: usize,
    /// Permits still to be forgotten after a lowered cap.
    deficit: usize,
}

/// Semaphore-backed limiter with a mutable cap.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    sizing: Mutex<Sizing>,
    admitted: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `capacity` runners.
    ///
    /// # Errors
    /// [`SlideError::InvalidConfig`] when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, SlideError> {
        validate_capacity(capacity)?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            sizing: Mutex::new(Sizing {
                capacity,
                deficit: 0,
            }),
            admitted: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Wait for a free slot and take it.
    ///
    /// Cancel-safe: dropping the future before it resolves takes nothing.
    pub async fn admit(self: &Arc<Self>) -> AdmissionPermit {
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => self.grant(permit),
            // The semaphore is never closed.
            Err(_) => std::future::pending().await,
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.grant(permit))
    }

    fn grant(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        let admitted = self.admitted.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(admitted, Ordering::SeqCst);
        debug!(admitted, capacity = self.capacity(), "Runner admitted");
        AdmissionPermit {
            permit: Some(permit),
            limiter: Arc::clone(self),
        }
    }

    /// Change the cap. Takes effect for the next admission decision.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), SlideError> {
        validate_capacity(capacity)?;
        let mut sizing = self.lock();
        let previous = sizing.capacity;
        if capacity > previous {
            let raise = capacity - previous;
            let repaid = raise.min(sizing.deficit);
            sizing.deficit -= repaid;
            self.semaphore.add_permits(raise - repaid);
        } else if capacity < previous {
            let cut = previous - capacity;
            let forgotten = self.semaphore.forget_permits(cut);
            sizing.deficit += cut - forgotten;
        }
        sizing.capacity = capacity;
        if previous != capacity {
            info!(
                from = previous,
                to = capacity,
                deficit = sizing.deficit,
                "Concurrency cap changed"
            );
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Runners currently holding a slot.
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously admitted runners observed.
    pub fn peak_admitted(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        self.admitted.fetch_sub(1, Ordering::SeqCst);
        let mut sizing = self.lock();
        if sizing.deficit > 0 {
            sizing.deficit -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }

    // A panic while holding the lock cannot leave the sizing torn, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Sizing> {
        self.sizing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of admission. The slot is released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.limiter.release(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    fn limiter(n: usize) -> Arc<ConcurrencyLimiter> {
        Arc::new(ConcurrencyLimiter::new(n).unwrap())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            ConcurrencyLimiter::new(0),
            Err(SlideError::InvalidConfig(_))
        ));
        let l = limiter(1);
        assert!(l.set_capacity(0).is_err());
        assert_eq!(l.capacity(), 1);
    }

    #[test]
    fn try_admit_respects_capacity() {
        let l = limiter(2);
        let a = l.try_admit().unwrap();
        let _b = l.try_admit().unwrap();
        assert!(l.try_admit().is_none());
        assert_eq!(l.admitted(), 2);

        drop(a);
        assert_eq!(l.admitted(), 1);
        assert!(l.try_admit().is_some());
        assert_eq!(l.peak_admitted(), 2);
    }

    #[test]
    fn admission_parks_at_capacity_until_a_release() {
        let l = limiter(1);
        let held = l.try_admit().unwrap();

        let mut waiter = task::spawn(l.admit());
        assert_pending!(waiter.poll());
        assert_eq!(l.admitted(), 1);

        drop(held);
        assert!(waiter.is_woken());
        let _permit = assert_ready!(waiter.poll());
        assert_eq!(l.admitted(), 1);
    }

    #[test]
    fn raised_cap_repays_deficit_first() {
        let l = limiter(2);
        let a = l.try_admit().unwrap();
        let b = l.try_admit().unwrap();
        l.set_capacity(1).unwrap();

        // Back to two before anyone released: no extra slot appears.
        l.set_capacity(2).unwrap();
        assert!(l.try_admit().is_none());

        drop(a);
        let _c = l.try_admit().unwrap();
        assert!(l.try_admit().is_none());
        drop(b);
        assert!(l.try_admit().is_some());
    }

    #[tokio::test]
    async fn release_wakes_a_waiter() {
        let l = limiter(1);
        let held = l.admit().await;

        let waiter = tokio::spawn({
            let l = Arc::clone(&l);
            async move {
                let _p = l.admit().await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be admitted")
            .unwrap();
    }

    #[tokio::test]
    async fn raising_capacity_admits_waiters() {
        let l = limiter(1);
        let _held = l.admit().await;

        let waiter = tokio::spawn({
            let l = Arc::clone(&l);
            async move { l.admit().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        l.set_capacity(2).unwrap();
        let _second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be admitted")
            .unwrap();
        assert_eq!(l.admitted(), 2);
    }

    #[tokio::test]
    async fn lowering_capacity_does_not_preempt() {
        let l = limiter(3);
        let a = l.admit().await;
        let b = l.admit().await;
        l.set_capacity(1).unwrap();

        assert_eq!(l.admitted(), 2);
        assert!(l.try_admit().is_none());

        drop(a);
        assert!(l.try_admit().is_none(), "still at the new cap");
        drop(b);
        assert!(l.try_admit().is_some());
    }

    #[tokio::test]
    async fn dropped_admission_future_takes_nothing() {
        let l = limiter(1);
        let held = l.admit().await;
        let attempt = tokio::time::timeout(Duration::from_millis(20), l.admit()).await;
        assert!(attempt.is_err());
        drop(held);
        assert_eq!(l.admitted(), 0);
    }
}
