//! Configuration management
//!
//! Run parameters and credentials come from the environment (optionally a
//! chain-specific `.env` file); the vault list comes from a TOML file.
//!
//! Created: 2026-10-02
//! Modified: 2026-10-06 - Harvest interval bounds, receipt timeout

use alloy::primitives::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MIN_PROFIT_THRESHOLD_USD: u32 = 50;
pub const DEFAULT_HARVEST_INTERVAL_SECS_DEV: i64 = 60;
pub const DEFAULT_HARVEST_INTERVAL_SECS_PROD: i64 = 3600;
/// Shortest accepted harvest interval. Zero/negative values would spin the timer.
pub const MIN_HARVEST_INTERVAL_SECS: i64 = 10;
pub const MAX_HARVEST_INTERVAL_SECS: i64 = 30 * 24 * 3600;
pub const DEFAULT_SLIPPAGE_TOLERANCE_BPS: u32 = 100;
pub const MIN_SLIPPAGE_TOLERANCE_BPS: u32 = 1;
pub const MAX_SLIPPAGE_TOLERANCE_BPS: u32 = 1000;
pub const DEFAULT_HARVEST_GAS_LIMIT: u64 = 500_000;
pub const MIN_HARVEST_GAS_LIMIT: u64 = 100_000;
pub const LOCK_RETRY_DELAY_MS_DEV: u64 = 2_000;
pub const LOCK_RETRY_DELAY_MS_PROD: u64 = 20_000;
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 600;

pub const ALCHEMY_RPC_BASE_URL: &str = "https://eth-mainnet.g.alchemy.com/v2";
pub const ANVIL_RPC_URL: &str = "http://localhost:8545";
pub const ETHUI_STACKS_RPC_URL: &str = "https://bityield.stacks.ethui.dev";

/// Validation failures surfaced at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{key}: invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{key}: {value} out of range [{min}, {max}]")]
    OutOfRange {
        key: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unsupported chain '{0}' (supported: anvil, ethuiStacks, mainnet)")]
    UnsupportedChain(String),
    #[error("PRIVATE_KEY must be a 0x-prefixed 32-byte hex string")]
    InvalidPrivateKey,
    #[error("no vaults configured")]
    NoVaults,
}

/// Supported networks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Anvil,
    EthuiStacks,
    Mainnet,
}

impl Chain {
    /// Development chains use mock prices, short intervals and short lock backoff.
    pub fn is_dev(&self) -> bool {
        matches!(self, Chain::Anvil | Chain::EthuiStacks)
    }

    pub fn default_rpc_url(&self, alchemy_api_key: Option<&str>) -> String {
        match self {
            Chain::Anvil => ANVIL_RPC_URL.to_string(),
            Chain::EthuiStacks => ETHUI_STACKS_RPC_URL.to_string(),
            Chain::Mainnet => match alchemy_api_key {
                Some(key) => format!("{}/{}", ALCHEMY_RPC_BASE_URL, key),
                None => ALCHEMY_RPC_BASE_URL.to_string(),
            },
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            Chain::Anvil => "https://explorer.ethui.dev/rpc/d3M6Ly9sb2NhbGhvc3Q6ODU0NQ%3D%3D",
            Chain::EthuiStacks => {
                "https://explorer.ethui.dev/rpc/aHR0cHM6Ly9iaXR5aWVsZC5zdGFja3MuZXRodWkuZGV2"
            }
            Chain::Mainnet => "https://etherscan.io",
        }
    }
}

impl FromStr for Chain {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anvil" => Ok(Chain::Anvil),
            "ethuistacks" => Ok(Chain::EthuiStacks),
            "mainnet" => Ok(Chain::Mainnet),
            other => Err(ConfigError::UnsupportedChain(other.to_string())),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Chain::Anvil => write!(f, "anvil"),
            Chain::EthuiStacks => write!(f, "ethuiStacks"),
            Chain::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Immutable parameters shared by every harvester in the process.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    pub min_profit_threshold_usd: Decimal,
    pub harvest_interval: Duration,
    pub slippage_tolerance_bps: u32,
    pub harvest_gas_limit: u64,
    pub lock_retry_delay: Duration,
    pub receipt_timeout: Duration,
}

impl RunParameters {
    /// Defaults for the given environment.
    pub fn defaults(dev: bool) -> Self {
        let (interval, retry_ms) = if dev {
            (DEFAULT_HARVEST_INTERVAL_SECS_DEV, LOCK_RETRY_DELAY_MS_DEV)
        } else {
            (DEFAULT_HARVEST_INTERVAL_SECS_PROD, LOCK_RETRY_DELAY_MS_PROD)
        };
        Self {
            min_profit_threshold_usd: Decimal::from(DEFAULT_MIN_PROFIT_THRESHOLD_USD),
            harvest_interval: Duration::from_secs(interval as u64),
            slippage_tolerance_bps: DEFAULT_SLIPPAGE_TOLERANCE_BPS,
            harvest_gas_limit: DEFAULT_HARVEST_GAS_LIMIT,
            lock_retry_delay: Duration::from_millis(retry_ms),
            receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// One `[[vault]]` entry of the vaults file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VaultEntry {
    pub symbol: String,
    pub address: String,
}

impl VaultEntry {
    pub fn parsed_address(&self) -> Result<Address> {
        self.address
            .parse()
            .with_context(|| format!("Invalid vault address for {}: {}", self.symbol, self.address))
    }
}

/// Top-level vaults TOML structure
#[derive(Debug, Clone, Deserialize)]
pub struct VaultsFile {
    #[serde(rename = "vault", default)]
    pub vaults: Vec<VaultEntry>,
}

impl VaultsFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read vaults file: {}", path.as_ref().display()))?;

        let file: Self =
            toml::from_str(&content).with_context(|| "Failed to parse vaults TOML")?;

        Ok(file)
    }
}

/// Bot configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub private_key: String,
    pub alchemy_api_key: Option<String>,
    pub mock_prices: bool,
    pub params: RunParameters,
    pub telegram: Option<TelegramConfig>,
    pub vaults: Vec<VaultEntry>,
}

impl BotConfig {
    pub fn is_dev(&self) -> bool {
        self.chain.is_dev()
    }

    /// Id used for logs and notifications, e.g. `mainnet/USDC`.
    pub fn vault_id(&self, symbol: &str) -> String {
        format!("{}/{}", self.chain, symbol)
    }

    /// Build a config from a key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F, vaults: Vec<VaultEntry>) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chain: Chain = match get("CHAIN") {
            Some(name) => name.parse()?,
            None => Chain::Anvil,
        };
        let dev = chain.is_dev();

        let private_key = get("PRIVATE_KEY").ok_or(ConfigError::Missing("PRIVATE_KEY"))?;
        if !is_valid_private_key(&private_key) {
            return Err(ConfigError::InvalidPrivateKey);
        }

        let alchemy_api_key = get("ALCHEMY_API_KEY");
        let mock_prices = match get("MOCK_PRICES") {
            Some(v) => parse_bool("MOCK_PRICES", &v)?,
            None => dev,
        };
        if !mock_prices && alchemy_api_key.is_none() {
            return Err(ConfigError::Missing("ALCHEMY_API_KEY"));
        }

        let rpc_url = get("RPC_URL")
            .unwrap_or_else(|| chain.default_rpc_url(alchemy_api_key.as_deref()));

        let defaults = RunParameters::defaults(dev);

        let min_profit_threshold_usd = match get("MIN_PROFIT_THRESHOLD_USD") {
            Some(v) => {
                let parsed = Decimal::from_str(v.trim()).map_err(|_| ConfigError::Invalid {
                    key: "MIN_PROFIT_THRESHOLD_USD",
                    value: v.clone(),
                })?;
                if parsed.is_sign_negative() {
                    return Err(ConfigError::Invalid {
                        key: "MIN_PROFIT_THRESHOLD_USD",
                        value: v,
                    });
                }
                parsed
            }
            None => defaults.min_profit_threshold_usd,
        };

        let harvest_interval = match get("HARVEST_INTERVAL_SECS") {
            Some(v) => {
                let secs = parse_int("HARVEST_INTERVAL_SECS", &v)?;
                check_range(
                    "HARVEST_INTERVAL_SECS",
                    secs,
                    MIN_HARVEST_INTERVAL_SECS,
                    MAX_HARVEST_INTERVAL_SECS,
                )?;
                Duration::from_secs(secs as u64)
            }
            None => defaults.harvest_interval,
        };

        let slippage_tolerance_bps = match get("SLIPPAGE_TOLERANCE_BPS") {
            Some(v) => {
                let bps = parse_int("SLIPPAGE_TOLERANCE_BPS", &v)?;
                check_range(
                    "SLIPPAGE_TOLERANCE_BPS",
                    bps,
                    MIN_SLIPPAGE_TOLERANCE_BPS as i64,
                    MAX_SLIPPAGE_TOLERANCE_BPS as i64,
                )?;
                bps as u32
            }
            None => defaults.slippage_tolerance_bps,
        };

        let harvest_gas_limit = match get("HARVEST_GAS_LIMIT") {
            Some(v) => {
                let gas = parse_int("HARVEST_GAS_LIMIT", &v)?;
                check_range("HARVEST_GAS_LIMIT", gas, MIN_HARVEST_GAS_LIMIT as i64, i64::MAX)?;
                gas as u64
            }
            None => defaults.harvest_gas_limit,
        };

        let receipt_timeout = match get("RECEIPT_TIMEOUT_SECS") {
            Some(v) => {
                let secs = parse_int("RECEIPT_TIMEOUT_SECS", &v)?;
                check_range("RECEIPT_TIMEOUT_SECS", secs, 1, i64::MAX)?;
                Duration::from_secs(secs as u64)
            }
            None => defaults.receipt_timeout,
        };

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            (None, _) if !dev => return Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN")),
            (_, None) if !dev => return Err(ConfigError::Missing("TELEGRAM_CHAT_ID")),
            _ => None,
        };

        if vaults.is_empty() {
            return Err(ConfigError::NoVaults);
        }

        Ok(BotConfig {
            chain,
            rpc_url,
            private_key,
            alchemy_api_key,
            mock_prices,
            params: RunParameters {
                min_profit_threshold_usd,
                harvest_interval,
                slippage_tolerance_bps,
                harvest_gas_limit,
                lock_retry_delay: defaults.lock_retry_delay,
                receipt_timeout,
            },
            telegram,
            vaults,
        })
    }
}

/// Load configuration from the environment, an optional `.env` file and the vaults file.
///
/// When `vaults_path` is `None` the chain-specific default `config/<chain>/vaults.toml` is used.
pub fn load_config(env_file: Option<&Path>, vaults_path: Option<&Path>) -> Result<BotConfig> {
    match env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("Failed to load env file: {}", path.display()))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let chain: Chain = match std::env::var("CHAIN") {
        Ok(name) if !name.trim().is_empty() => name.parse()?,
        _ => Chain::Anvil,
    };

    let default_vaults = format!("config/{}/vaults.toml", chain);
    let vaults_path = vaults_path.unwrap_or_else(|| Path::new(&default_vaults));
    let vaults = VaultsFile::load(vaults_path)?.vaults;

    let config = BotConfig::from_lookup(|key| std::env::var(key).ok(), vaults)?;
    Ok(config)
}

fn is_valid_private_key(key: &str) -> bool {
    match key.strip_prefix("0x") {
        Some(hex) => hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn parse_int(key: &'static str, value: &str) -> std::result::Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> std::result::Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

fn check_range(key: &'static str, value: i64, min: i64, max: i64) -> std::result::Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(())
}
