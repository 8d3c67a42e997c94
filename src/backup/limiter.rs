use super::error::Cancelled;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting gate that bounds how many copies run at once.
///
/// Slots are handed out in request order. A slot is released when its
/// [`SlotGuard`] is dropped, so every exit path of the holder releases it.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// Capacity is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Wait for a free slot, or fail without acquiring once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SlotGuard, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            permit = self.semaphore.clone().acquire_owned() => permit.map_err(|_| Cancelled)?,
        };

        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(SlotGuard {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        })
    }
}

/// One held limiter slot
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
