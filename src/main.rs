//! Harvest Bot
//!
//! Main entry point. Loads configuration for the selected chain, builds one
//! harvester per configured vault (sharing a single signer, provider and
//! harvest lock), then hands control to the supervisor until SIGINT/SIGTERM
//! or a panic.
//!
//! Created: 2026-10-02
//! Modified: 2026-10-06 - Telegram command listener, JSON log output

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::Parser;
use harvest_bot::config::load_config;
use harvest_bot::harvest::{HarvestLock, Harvester};
use harvest_bot::lifecycle::{install_panic_hook, Supervisor};
use harvest_bot::notify::{Notifier, NotifyChannel, TelegramChannel};
use harvest_bot::pricing::{PriceSource, PricingService};
use harvest_bot::vault::{OnChainVault, VaultClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Harvest Bot: profit-gated vault harvesting
#[derive(Parser, Debug)]
#[command(name = "harvest-bot")]
struct Args {
    /// Chain to run on (anvil, ethuiStacks, mainnet)
    #[arg(short, long, env = "CHAIN", default_value = "anvil")]
    chain: String,

    /// Env file to load (default: .env.<chain> if present, else .env)
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Vaults file (default: config/<chain>/vaults.toml)
    #[arg(short, long)]
    vaults: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            error!("Start failed: {:#}", e);
            eprintln!("Start failed: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

#[tokio::main]
async fn run() -> Result<i32> {
    init_logging();
    let fatal = install_panic_hook()?;

    let args = Args::parse();
    // Selected chain wins over any CHAIN in the env file
    std::env::set_var("CHAIN", &args.chain);

    let env_file = args.env_file.clone().or_else(|| {
        let chain_file = PathBuf::from(format!(".env.{}", args.chain));
        chain_file.exists().then_some(chain_file)
    });
    let config = load_config(env_file.as_deref(), args.vaults.as_deref())?;

    info!(
        chain = %config.chain,
        mock_prices = config.mock_prices,
        harvest_interval_secs = config.params.harvest_interval.as_secs(),
        vaults = config.vaults.len(),
        "Starting bots"
    );
    let rpc_preview: String = config.rpc_url.chars().take(40).collect();
    info!("RPC URL: {}...", rpc_preview);

    let signer: PrivateKeySigner = config
        .private_key
        .parse()
        .context("Failed to parse PRIVATE_KEY")?;
    info!("Harvest account: {:?}", signer.address());

    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(config.rpc_url.parse().context("Invalid RPC URL")?)
        .erased();
    let chain_id = provider
        .get_chain_id()
        .await
        .context("Failed to reach RPC endpoint")?;
    info!("Connected (chain_id: {})", chain_id);

    let notifier = match &config.telegram {
        Some(telegram) => {
            let channel = Arc::new(TelegramChannel::new(telegram)?);
            let notifier = Arc::new(Notifier::new(
                Some(Arc::clone(&channel) as Arc<dyn NotifyChannel>),
                Some(config.chain.explorer_url().to_string()),
            ));
            notifier.spawn_command_listener(channel).await;
            notifier
        }
        None => Arc::new(Notifier::new(None, Some(config.chain.explorer_url().to_string()))),
    };

    let lock = Arc::new(HarvestLock::new());
    let mut harvesters = Vec::with_capacity(config.vaults.len());

    for entry in &config.vaults {
        let id = config.vault_id(&entry.symbol);
        let address = entry.parsed_address()?;
        let vault = OnChainVault::new(provider.clone(), address, config.params.receipt_timeout);
        let instance = vault
            .resolve_instance(id.clone())
            .await
            .with_context(|| format!("Failed to resolve vault {}", id))?;
        info!(
            vault = %id,
            underlying = ?instance.underlying,
            reward = ?instance.reward_token,
            "Vault resolved"
        );

        let pricing: Arc<dyn PriceSource> = match (&config.alchemy_api_key, config.mock_prices) {
            (Some(key), false) => Arc::new(PricingService::live(id.clone(), key.clone())?),
            _ => Arc::new(PricingService::mock(id.clone())),
        };

        harvesters.push(Harvester::new(
            instance,
            Arc::new(vault) as Arc<dyn VaultClient>,
            pricing,
            Arc::clone(&lock),
            Arc::clone(&notifier),
            config.params.clone(),
        ));
    }

    let supervisor = Supervisor::new(harvesters, notifier);
    supervisor.start().await;
    supervisor.run_until_shutdown(fatal).await
}
