//! Price Oracle Adapter
//!
//! USD unit prices for the vault's underlying and reward tokens.
//!
//! Two modes:
//! - Mock: fixed prices (stablecoin = $1, reward token = $120,000) for local chains
//! - Live: Alchemy Prices API, one POST per token lookup
//!
//! Created: 2026-10-02

use alloy::primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

pub const ALCHEMY_PRICE_API_BASE_URL: &str = "https://api.g.alchemy.com/prices/v1";

/// WBTC mock price
pub const MOCK_REWARD_TOKEN_PRICE_USD: u32 = 120_000;
/// USDC/USDT mock price
pub const MOCK_STABLECOIN_PRICE_USD: u32 = 1;

const PRICE_NETWORK: &str = "eth-mainnet";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("price request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("No USD price found")]
    MissingUsdPrice,
    #[error("Invalid price: {0}")]
    InvalidPrice(String),
}

/// Source of USD unit prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Price of one whole underlying token
    async fn underlying_price(&self, token: Address) -> Result<Decimal, PriceError>;

    /// Price of one whole reward token
    async fn reward_price(&self, token: Address) -> Result<Decimal, PriceError>;
}

#[derive(Debug, Clone)]
enum PriceMode {
    Mock,
    Live { api_key: String, base_url: String },
}

/// Mock or Alchemy-backed price source
pub struct PricingService {
    id: String,
    mode: PriceMode,
    client: reqwest::Client,
}

impl PricingService {
    /// Deterministic prices, no network access
    pub fn mock(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: PriceMode::Mock,
            client: reqwest::Client::new(),
        }
    }

    /// Live prices from the Alchemy Prices API
    pub fn live(id: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            id: id.into(),
            mode: PriceMode::Live {
                api_key: api_key.into(),
                base_url: ALCHEMY_PRICE_API_BASE_URL.to_string(),
            },
            client,
        })
    }

    /// Override the API base URL (self-hosted proxy, tests)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        if let PriceMode::Live { base_url, .. } = &mut self.mode {
            *base_url = url.into();
        }
        self
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.mode, PriceMode::Mock)
    }

    async fn fetch_price(&self, api_key: &str, base_url: &str, token: Address) -> Result<Decimal, PriceError> {
        let url = format!("{}/{}/tokens/by-address", base_url, api_key);
        let request = TokenPriceRequest {
            addresses: vec![TokenAddress {
                network: PRICE_NETWORK.to_string(),
                address: format!("{:?}", token),
            }],
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PriceError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body: TokenPriceResponse = response.json().await?;
        let price = parse_usd_price(&body)?;
        info!(vault = %self.id, token = ?token, %price, "Price fetched");
        Ok(price)
    }

    async fn real_price(&self, token: Address) -> Result<Decimal, PriceError> {
        let PriceMode::Live { api_key, base_url } = &self.mode else {
            return Err(PriceError::MissingUsdPrice);
        };
        match self.fetch_price(api_key, base_url, token).await {
            Ok(price) => Ok(price),
            Err(e) => {
                error!(vault = %self.id, token = ?token, "Price fetch failed: {}", e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl PriceSource for PricingService {
    async fn underlying_price(&self, token: Address) -> Result<Decimal, PriceError> {
        if self.is_mock() {
            debug!(vault = %self.id, "mocking token price as {} USD", MOCK_STABLECOIN_PRICE_USD);
            return Ok(Decimal::from(MOCK_STABLECOIN_PRICE_USD));
        }
        self.real_price(token).await
    }

    async fn reward_price(&self, token: Address) -> Result<Decimal, PriceError> {
        if self.is_mock() {
            debug!(vault = %self.id, "mocking reward token price as {} USD", MOCK_REWARD_TOKEN_PRICE_USD);
            return Ok(Decimal::from(MOCK_REWARD_TOKEN_PRICE_USD));
        }
        self.real_price(token).await
    }
}

#[derive(Debug, Serialize)]
struct TokenPriceRequest {
    addresses: Vec<TokenAddress>,
}

#[derive(Debug, Serialize)]
struct TokenAddress {
    network: String,
    address: String,
}

/// Alchemy `tokens/by-address` response
#[derive(Debug, Default, Deserialize)]
pub struct TokenPriceResponse {
    #[serde(default)]
    pub data: Vec<TokenPriceEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenPriceEntry {
    #[serde(default)]
    pub prices: Vec<PriceQuote>,
}

#[derive(Debug, Deserialize)]
pub struct PriceQuote {
    pub currency: String,
    pub value: String,
}

/// Extract the USD quote for the first requested token.
pub fn parse_usd_price(body: &TokenPriceResponse) -> Result<Decimal, PriceError> {
    let quote = body
        .data
        .first()
        .and_then(|entry| entry.prices.iter().find(|p| p.currency.eq_ignore_ascii_case("usd")))
        .filter(|p| !p.value.trim().is_empty())
        .ok_or(PriceError::MissingUsdPrice)?;

    let price = Decimal::from_str(quote.value.trim())
        .or_else(|_| Decimal::from_scientific(quote.value.trim()))
        .map_err(|_| PriceError::InvalidPrice(quote.value.clone()))?;

    if price <= Decimal::ZERO {
        return Err(PriceError::InvalidPrice(quote.value.clone()));
    }
    Ok(price)
}
