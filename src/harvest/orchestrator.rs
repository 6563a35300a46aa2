//! Harvest Orchestrator
//!
//! One `Harvester` per vault. Each tick spawns a cycle:
//!   1. Leave Idle (dropped if the previous cycle is still running)
//!   2. Take the global harvest lock (bounded retries)
//!   3. Ask the decision engine for a minOut
//!   4. Submit harvest(minOut) and wait for the receipt
//!   5. Record stats and notify
//!
//! Contention and ineligibility skips leave the stats untouched. A vault that
//! stays ineligible for more than a day triggers one stale-conditions alert
//! until the next successful harvest.
//!
//! Created: 2026-10-04
//! Modified: 2026-10-07 - Error payload sanitizing

use super::decision::DecisionEngine;
use super::lock::{HarvestLock, LOCK_MAX_RETRIES};
use super::status::{HarvestPhase, HarvestStatus, PhaseGuard};
use crate::config::RunParameters;
use crate::notify::Notifier;
use crate::pricing::PriceSource;
use crate::types::{
    CycleOutcome, Evaluation, HarvestReport, HarvestStats, ReceiptStatus, SkipReason, VaultInstance,
};
use crate::vault::VaultClient;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Ineligible for longer than this without a successful harvest triggers an alert
pub const STALE_CONDITIONS_HOURS: i64 = 24;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_MAX_POLLS: u32 = 30;

/// Hex runs longer than this (prefix included) are elided from error messages
const MAX_HEX_PAYLOAD_CHARS: usize = 138;
const MAX_ERROR_CHARS: usize = 512;

pub struct Harvester {
    vault: VaultInstance,
    client: Arc<dyn VaultClient>,
    engine: DecisionEngine,
    lock: Arc<HarvestLock>,
    notifier: Arc<Notifier>,
    params: RunParameters,
    status: Arc<HarvestStatus>,
    shutting_down: AtomicBool,
    stale_notified: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Harvester {
    /// Build a harvester and register its status with the notifier.
    pub fn new(
        vault: VaultInstance,
        client: Arc<dyn VaultClient>,
        pricing: Arc<dyn PriceSource>,
        lock: Arc<HarvestLock>,
        notifier: Arc<Notifier>,
        params: RunParameters,
    ) -> Arc<Self> {
        let status = Arc::new(HarvestStatus::new(vault.id.clone(), Utc::now()));
        notifier.register_instance(Arc::clone(&status));

        Arc::new(Self {
            engine: DecisionEngine::new(params.clone(), pricing),
            vault,
            client,
            lock,
            notifier,
            params,
            status,
            shutting_down: AtomicBool::new(false),
            stale_notified: AtomicBool::new(false),
            ticker: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.vault.id
    }

    pub fn status(&self) -> &Arc<HarvestStatus> {
        &self.status
    }

    pub fn is_harvesting(&self) -> bool {
        self.status.is_harvesting()
    }

    pub async fn stats(&self) -> HarvestStats {
        self.status.stats().await
    }

    pub fn set_shutting_down(&self, value: bool) {
        self.shutting_down.store(value, Ordering::SeqCst);
    }

    fn next_harvest_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.params.harvest_interval.as_secs() as i64)
    }

    /// Run one cycle now, then one every `harvest_interval`. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            warn!(vault = %self.vault.id, "Already started");
            return;
        }
        info!(vault = %self.vault.id, address = ?self.vault.address, "Started");

        let next = self.next_harvest_from(Utc::now());
        self.status.stats.write().await.next_harvest_time = Some(next);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.params.harvest_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // First tick completes immediately
                interval.tick().await;
                let cycle = Arc::clone(&this);
                tokio::spawn(async move {
                    cycle.run_cycle().await;
                });
            }
        });

        *ticker = Some(handle);
    }

    /// Stop scheduling and wait (bounded) for an in-flight cycle to finish.
    ///
    /// Returns `false` if the cycle was still running when the wait ran out.
    pub async fn stop(&self) -> bool {
        info!(vault = %self.vault.id, "Stopping...");
        self.set_shutting_down(true);

        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
            info!(vault = %self.vault.id, "Interval cleared");
        }

        let mut polls = 0;
        while self.is_harvesting() && polls < SHUTDOWN_MAX_POLLS {
            debug!(vault = %self.vault.id, "Waiting... ({}/{}s)", polls + 1, SHUTDOWN_MAX_POLLS);
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            polls += 1;
        }

        if self.is_harvesting() {
            warn!(vault = %self.vault.id, "Forced stop (timeout)");
            false
        } else {
            info!(vault = %self.vault.id, "Clean stop");
            true
        }
    }

    /// One full attempt. Never fails; errors become `CycleOutcome::Failed`.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let span = info_span!("harvest", vault = %self.vault.id);
        self.cycle().instrument(span).await
    }

    async fn cycle(&self) -> CycleOutcome {
        let Some(phase) = self.status.try_begin() else {
            debug!("Skip - previous attempt still running");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };
        self.cycle_in_phase(phase).await
    }

    async fn cycle_in_phase(&self, phase: PhaseGuard<'_>) -> CycleOutcome {
        // Read after leaving Idle: stop() sets the flag before it polls the phase
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("Skip - shutting down");
            return CycleOutcome::Skipped(SkipReason::Busy);
        }

        let Some(lock) = self
            .lock
            .acquire_with_retry(LOCK_MAX_RETRIES, self.params.lock_retry_delay)
            .await
        else {
            debug!("Skip - locked after max attempts");
            return CycleOutcome::Skipped(SkipReason::LockContention);
        };

        info!("Initiating harvest");
        let outcome = match self.execute(|p| phase.advance(p)).await {
            Ok(outcome) => outcome,
            Err(e) => CycleOutcome::Failed {
                error: sanitize_error(&format!("{:#}", e)),
            },
        };
        drop(lock);

        self.finish(&outcome).await;
        drop(phase);
        outcome
    }

    async fn execute(&self, advance: impl Fn(HarvestPhase)) -> Result<CycleOutcome> {
        advance(HarvestPhase::Evaluating);
        let min_out = match self.engine.evaluate(&self.vault, self.client.as_ref()).await? {
            Evaluation::Eligible { min_out } => min_out,
            Evaluation::Ineligible(reason) => {
                return Ok(CycleOutcome::Skipped(SkipReason::Ineligible(reason)));
            }
        };

        advance(HarvestPhase::Submitting);
        let hash = self
            .client
            .harvest(min_out, self.params.harvest_gas_limit)
            .await?;
        info!(?hash, %min_out, "Harvest tx submitted");

        advance(HarvestPhase::Confirming);
        let outcome = match self.client.wait_for_receipt(hash).await? {
            ReceiptStatus::Success => CycleOutcome::Harvested { hash },
            ReceiptStatus::Reverted => CycleOutcome::Reverted { hash },
        };
        Ok(outcome)
    }

    async fn finish(&self, outcome: &CycleOutcome) {
        let report = match outcome {
            CycleOutcome::Skipped(SkipReason::Ineligible(reason)) => {
                debug!(%reason, "Harvest conditions not met");
                self.check_stale_conditions().await;
                return;
            }
            CycleOutcome::Skipped(_) => return,
            CycleOutcome::Harvested { hash } => {
                info!(?hash, "Harvest confirmed");
                self.stale_notified.store(false, Ordering::SeqCst);
                HarvestReport::Success { hash: *hash }
            }
            CycleOutcome::Reverted { hash } => {
                error!(?hash, "Harvest reverted");
                HarvestReport::Failure {
                    error: "Transaction reverted".to_string(),
                }
            }
            CycleOutcome::Failed { error } => {
                error!("Harvest error: {}", error);
                HarvestReport::Failure {
                    error: error.clone(),
                }
            }
        };

        let now = Utc::now();
        let next = self.next_harvest_from(now);
        {
            let mut stats = self.status.stats.write().await;
            match report {
                HarvestReport::Success { .. } => stats.record_success(now),
                HarvestReport::Failure { .. } => stats.record_failure(now),
            }
            stats.next_harvest_time = Some(next);
        }

        self.notifier
            .notify_harvest_outcome(&self.vault.id, &report, Some(next))
            .await;
    }

    async fn check_stale_conditions(&self) {
        if self.stale_notified.load(Ordering::SeqCst) {
            return;
        }

        let last_success = self.status.stats.read().await.last_success_time;
        let stale = match last_success {
            Some(at) => Utc::now() - at > chrono::Duration::hours(STALE_CONDITIONS_HOURS),
            None => true,
        };
        if !stale {
            return;
        }

        info!(last_success = ?last_success, "Notifying conditions not met");
        self.notifier
            .notify_stale_conditions(&self.vault.id, last_success)
            .await;
        self.stale_notified.store(true, Ordering::SeqCst);
    }
}

/// Elide long hex blobs (calldata, ABI-encoded reverts) and cap the length.
pub fn sanitize_error(message: &str) -> String {
    let mut out = String::with_capacity(message.len().min(MAX_ERROR_CHARS + 8));
    let mut rest = message;

    while let Some(pos) = rest.find("0x") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let digits = after.bytes().take_while(u8::is_ascii_hexdigit).count();
        if digits + 2 > MAX_HEX_PAYLOAD_CHARS {
            out.push_str(&format!("0x…({} bytes)", digits / 2));
        } else {
            out.push_str(&rest[pos..pos + 2 + digits]);
        }
        rest = &after[digits..];
    }
    out.push_str(rest);

    if out.chars().count() > MAX_ERROR_CHARS {
        let truncated: String = out.chars().take(MAX_ERROR_CHARS).collect();
        return format!("{}…", truncated);
    }
    out
}
