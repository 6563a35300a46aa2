//! Harvest Bot Library
//!
//! Periodically harvests yield vaults when the slippage-protected output is
//! worth more than a USD threshold. One harvester per vault, one global lock
//! per signing account, chat notifications for outcomes.
//!
//! Created: 2026-10-02

pub mod config;
pub mod contracts;
pub mod harvest;
pub mod lifecycle;
pub mod notify;
pub mod pricing;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::{load_config, BotConfig, Chain, RunParameters};
pub use harvest::{DecisionEngine, HarvestLock, Harvester};
pub use lifecycle::{install_panic_hook, Supervisor};
pub use notify::{Notifier, NotifyChannel, TelegramChannel};
pub use pricing::{PriceSource, PricingService};
pub use types::{CycleOutcome, Evaluation, HarvestStats, VaultInstance};
pub use vault::{OnChainVault, VaultClient};
