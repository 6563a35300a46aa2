//! Global Harvest Lock: one harvest in flight per signing account
//!
//! Every harvester in the process signs with the same key, so two concurrent
//! submissions would race on nonce assignment. The lock is a single shared
//! flag handed to each harvester as an `Arc<HarvestLock>`.
//!
//! Acquisition is non-blocking; callers that lose simply retry later.
//! `HarvestLockGuard` releases on drop so every exit path frees the lock.
//!
//! Created: 2026-10-03

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Attempts before a harvester gives up on the current tick
pub const LOCK_MAX_RETRIES: u32 = 5;

#[derive(Debug, Default)]
pub struct HarvestLock {
    held: AtomicBool,
}

impl HarvestLock {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Check-and-set. Returns true if the caller now holds the lock.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditional reset.
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Non-blocking acquire returning a guard that releases on drop.
    pub fn try_lock(self: &Arc<Self>) -> Option<HarvestLockGuard> {
        if self.try_acquire() {
            Some(HarvestLockGuard {
                lock: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Up to `attempts` tries, sleeping `retry_delay` between failures.
    ///
    /// No sleep follows the final failed attempt. Fixed budget regardless of
    /// how many harvesters are contending.
    pub async fn acquire_with_retry(
        self: &Arc<Self>,
        attempts: u32,
        retry_delay: Duration,
    ) -> Option<HarvestLockGuard> {
        for attempt in 1..=attempts {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            if attempt == attempts {
                break;
            }
            debug!("Harvest lock busy (attempt {}/{}), retrying in {:?}", attempt, attempts, retry_delay);
            tokio::time::sleep(retry_delay).await;
        }
        None
    }
}

/// Scoped ownership of the harvest lock
#[derive(Debug)]
pub struct HarvestLockGuard {
    lock: Arc<HarvestLock>,
}

impl Drop for HarvestLockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
