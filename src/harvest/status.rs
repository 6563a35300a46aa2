//! Per-vault harvest phase and statistics
//!
//! `HarvestStatus` is the only part of a harvester other components see.
//! The notifier keeps an `Arc` of it for `/status` reports while the owning
//! harvester drives the phase machine:
//!
//!   Idle → Locking → Evaluating → Submitting → Confirming → Idle
//!
//! Leaving Idle is a single compare-and-swap, so a tick that finds the
//! previous attempt still running is dropped instead of queued.
//!
//! Created: 2026-10-04

use crate::types::HarvestStats;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HarvestPhase {
    Idle = 0,
    /// Waiting for the global harvest lock
    Locking = 1,
    Evaluating = 2,
    Submitting = 3,
    Confirming = 4,
}

impl HarvestPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HarvestPhase::Locking,
            2 => HarvestPhase::Evaluating,
            3 => HarvestPhase::Submitting,
            4 => HarvestPhase::Confirming,
            _ => HarvestPhase::Idle,
        }
    }
}

impl fmt::Display for HarvestPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HarvestPhase::Idle => "idle",
            HarvestPhase::Locking => "locking",
            HarvestPhase::Evaluating => "evaluating",
            HarvestPhase::Submitting => "submitting",
            HarvestPhase::Confirming => "confirming",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct HarvestStatus {
    id: String,
    phase: AtomicU8,
    pub(crate) stats: RwLock<HarvestStats>,
}

impl HarvestStatus {
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            phase: AtomicU8::new(HarvestPhase::Idle as u8),
            stats: RwLock::new(HarvestStats::new(start_time)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> HarvestPhase {
        HarvestPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// True from lock acquisition attempt until the attempt fully unwinds.
    pub fn is_harvesting(&self) -> bool {
        self.phase() != HarvestPhase::Idle
    }

    /// Snapshot of the statistics
    pub async fn stats(&self) -> HarvestStats {
        self.stats.read().await.clone()
    }

    /// Idle → Locking. Returns a guard that puts the phase back to Idle on drop.
    pub(crate) fn try_begin(&self) -> Option<PhaseGuard<'_>> {
        self.phase
            .compare_exchange(
                HarvestPhase::Idle as u8,
                HarvestPhase::Locking as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| PhaseGuard { status: self })
    }
}

/// Ownership of a non-idle phase
pub(crate) struct PhaseGuard<'a> {
    status: &'a HarvestStatus,
}

impl PhaseGuard<'_> {
    pub(crate) fn advance(&self, phase: HarvestPhase) {
        self.status.phase.store(phase as u8, Ordering::Release);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.status
            .phase
            .store(HarvestPhase::Idle as u8, Ordering::Release);
    }
}
