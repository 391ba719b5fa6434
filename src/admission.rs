//! Admission control (spec §4.3 step 1, §6, component H): bounds the number
//! of calls in flight at once so a burst of `invoke()`s degrades by
//! rejecting new work instead of piling up unbounded memory and queueing
//! delay.
//!
//! Grounded on `stream_manager.rs`'s `tokio::time::timeout` pattern around
//! the oneshot await, applied here to a `Semaphore::acquire` instead of a
//! response channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{HubError, HubResult};

pub struct AdmissionControl {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl AdmissionControl {
    pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            acquire_timeout,
        }
    }

    /// Blocks up to `acquire_timeout` for a free slot. The returned guard
    /// releases the slot on drop regardless of how the caller's future
    /// exits (normal return, error, or cancellation), so a slot can never
    /// leak (spec §6: "a rejected/timed-out/cancelled call must release any
    /// resources it held").
    pub async fn acquire(&self) -> HubResult<SemaphorePermit<'_>> {
        match tokio::time::timeout(
            self.acquire_timeout,
            self.semaphore.acquire(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => {
                unreachable!("semaphore is never closed while the hub is live")
            }
            Err(_) => Err(HubError::Overloaded),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_within_capacity() {
        let admission = AdmissionControl::new(2, Duration::from_millis(50));
        let _a = admission.acquire().await.unwrap();
        let _b = admission.acquire().await.unwrap();
        assert_eq!(admission.available_permits(), 0);
    }

    #[tokio::test]
    async fn rejects_when_capacity_exhausted() {
        let admission = AdmissionControl::new(1, Duration::from_millis(20));
        let _held = admission.acquire().await.unwrap();

        let result = admission.acquire().await;
        assert!(matches!(result, Err(HubError::Overloaded)));
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_capacity_for_the_next_caller() {
        let admission = AdmissionControl::new(1, Duration::from_millis(200));
        {
            let _held = admission.acquire().await.unwrap();
        } // dropped here, permit released

        let second = admission.acquire().await;
        assert!(second.is_ok());
    }
}
