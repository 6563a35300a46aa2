//! Core data structures shared by the harvest pipeline.

use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// One deployed vault contract bound to an (underlying, reward) token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultInstance {
    /// Stable identifier, `"<network>/<symbol>"`
    pub id: String,
    pub address: Address,
    pub underlying: Address,
    pub reward_token: Address,
}

impl VaultInstance {
    pub fn new(id: String, address: Address, underlying: Address, reward_token: Address) -> Self {
        Self {
            id,
            address,
            underlying,
            reward_token,
        }
    }
}

/// Outcome of the most recent attempted harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LastOutcome {
    NeverRun,
    Success,
    Failure,
}

/// Rolling per-vault harvest statistics.
///
/// Owned by one orchestrator; everyone else gets a clone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_harvest_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_outcome: LastOutcome,
    pub next_harvest_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
}

impl HarvestStats {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            last_harvest_time: None,
            last_success_time: None,
            last_outcome: LastOutcome::NeverRun,
            next_harvest_time: None,
            start_time,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.success_count += 1;
        self.last_harvest_time = Some(at);
        self.last_success_time = Some(at);
        self.last_outcome = LastOutcome::Success;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_harvest_time = Some(at);
        self.last_outcome = LastOutcome::Failure;
    }
}

/// Why the decision engine declined to harvest.
#[derive(Debug, Clone, PartialEq)]
pub enum IneligibleReason {
    /// `canHarvest()` returned false
    NotHarvestable,
    /// Nothing pending
    ZeroYield,
    /// Slippage-protected output rounds to zero base units
    MinOutZero,
    /// Output is worth less than the profit threshold
    BelowProfitThreshold { min_out_usd: rust_decimal::Decimal },
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IneligibleReason::NotHarvestable => write!(f, "canHarvest=false"),
            IneligibleReason::ZeroYield => write!(f, "zero pending yield"),
            IneligibleReason::MinOutZero => write!(f, "minOut rounds to zero"),
            IneligibleReason::BelowProfitThreshold { min_out_usd } => {
                write!(f, "minOutUsd ${:.2} below threshold", min_out_usd)
            }
        }
    }
}

/// Decision engine verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Eligible { min_out: U256 },
    Ineligible(IneligibleReason),
}

/// Why a scheduled attempt never reached the vault.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Previous attempt still running, or shutting down
    Busy,
    /// Global lock not acquired within the retry budget
    LockContention,
    Ineligible(IneligibleReason),
}

/// Terminal result of one orchestrator cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Harvested { hash: TxHash },
    Reverted { hash: TxHash },
    Failed { error: String },
}

/// What the notifier is told about a finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestReport {
    Success { hash: TxHash },
    Failure { error: String },
}

/// On-chain receipt classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_start_empty() {
        let now = Utc::now();
        let stats = HarvestStats::new(now);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.last_outcome, LastOutcome::NeverRun);
        assert!(stats.last_harvest_time.is_none());
        assert_eq!(stats.start_time, now);
    }

    #[test]
    fn test_failure_keeps_last_success_time() {
        let mut stats = HarvestStats::new(Utc::now());
        let t1 = Utc::now();
        stats.record_success(t1);
        let t2 = t1 + chrono::Duration::hours(1);
        stats.record_failure(t2);

        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.last_harvest_time, Some(t2));
        assert_eq!(stats.last_success_time, Some(t1));
        assert_eq!(stats.last_outcome, LastOutcome::Failure);
    }

    #[test]
    fn test_ineligible_reason_display() {
        let reason = IneligibleReason::BelowProfitThreshold {
            min_out_usd: rust_decimal::Decimal::new(990, 2),
        };
        assert_eq!(reason.to_string(), "minOutUsd $9.90 below threshold");
    }
}
