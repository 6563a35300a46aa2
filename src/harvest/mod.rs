//! Harvest pipeline: global lock, decision engine, per-vault orchestrator.

pub mod decision;
pub mod lock;
pub mod orchestrator;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

pub use decision::{compute_min_out, DecisionEngine, SwapMath};
pub use lock::{HarvestLock, HarvestLockGuard, LOCK_MAX_RETRIES};
pub use orchestrator::{sanitize_error, Harvester};
pub use status::{HarvestPhase, HarvestStatus};
