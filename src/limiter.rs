//! Counting semaphore bounding how many agents run at once.
//!
//! One limiter is shared by every session of an orchestrator, so concurrent
//! sessions compete for the same pool of execution slots. Waiters are served
//! in FIFO order. A permit is released when the [`AgentPermit`] is dropped or
//! [`AgentPermit::release`] is called.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{OrchestrationError, OrchestrationResult};

/// FIFO counting semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
    waiting: Arc<AtomicUsize>,
}

/// An execution slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct AgentPermit {
    _permit: OwnedSemaphorePermit,
}

impl AgentPermit {
    /// Explicitly give the slot back.
    pub fn release(self) {}
}

/// Decrements the waiter count even if the acquiring future is dropped.
struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter with `permits` slots (at least one).
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    ///
    /// Fails only after [`close`](Self::close).
    pub async fn acquire(&self) -> OrchestrationResult<AgentPermit> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitGuard(&self.waiting);

        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| AgentPermit { _permit: permit })
            .map_err(|_| OrchestrationError::LimiterClosed)
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<AgentPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AgentPermit { _permit: permit })
    }

    /// Total slots.
    pub fn capacity(&self) -> usize {
        self.permits
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.permits.saturating_sub(self.available())
    }

    /// Callers blocked in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Reject all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether the limiter has been closed.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, task};

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.active(), 2);
        assert_eq!(limiter.available(), 0);
        assert!(limiter.try_acquire().is_none());

        first.release();
        assert_eq!(limiter.active(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_zero_permits_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }

    #[test]
    fn test_waiters_are_served_in_fifo_order() {
        let limiter = ConcurrencyLimiter::new(2);

        let mut a = task::spawn(limiter.acquire());
        let mut b = task::spawn(limiter.acquire());
        let mut c = task::spawn(limiter.acquire());
        let mut d = task::spawn(limiter.acquire());
        let mut e = task::spawn(limiter.acquire());

        let permit_a = assert_ready!(a.poll()).unwrap();
        let permit_b = assert_ready!(b.poll()).unwrap();
        assert_pending!(c.poll());
        assert_pending!(d.poll());
        assert_pending!(e.poll());
        assert_eq!(limiter.active(), 2);
        assert_eq!(limiter.waiting(), 3);

        drop(permit_a);
        assert!(c.is_woken());
        assert!(!d.is_woken());
        let permit_c = assert_ready!(c.poll()).unwrap();
        assert_pending!(d.poll());
        assert_eq!(limiter.active(), 2);

        drop(permit_b);
        let permit_d = assert_ready!(d.poll()).unwrap();
        assert_pending!(e.poll());

        drop(permit_c);
        let permit_e = assert_ready!(e.poll()).unwrap();
        assert_eq!(limiter.active(), 2);
        assert_eq!(limiter.waiting(), 0);

        drop(permit_d);
        drop(permit_e);
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn test_never_more_than_capacity_active() {
        let limiter = ConcurrencyLimiter::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.active(), 0);
    }

    #[test]
    fn test_close_rejects_waiters() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.try_acquire().unwrap();
        let mut waiter = task::spawn(limiter.acquire());
        assert_pending!(waiter.poll());

        limiter.close();
        assert!(limiter.is_closed());
        let err = assert_ready_err!(waiter.poll());
        assert!(matches!(err, OrchestrationError::LimiterClosed));
    }

    #[test]
    fn test_dropped_waiter_is_not_counted() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.try_acquire().unwrap();
        let mut waiter = task::spawn(limiter.acquire());
        assert_pending!(waiter.poll());
        assert_eq!(limiter.waiting(), 1);

        drop(waiter);
        assert_eq!(limiter.waiting(), 0);
    }
}
