//! In-memory vault, price source and notification channel for tests.

use crate::config::RunParameters;
use crate::notify::NotifyChannel;
use crate::pricing::{PriceError, PriceSource};
use crate::types::{ReceiptStatus, VaultInstance};
use crate::vault::VaultClient;
use alloy::primitives::{Address, TxHash, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const UNDERLYING: Address = Address::repeat_byte(0x11);
pub const REWARD: Address = Address::repeat_byte(0x22);
pub const TX_HASH: TxHash = TxHash::repeat_byte(0xab);

pub fn test_vault() -> VaultInstance {
    VaultInstance::new(
        "anvil/USDC".to_string(),
        Address::repeat_byte(0x01),
        UNDERLYING,
        REWARD,
    )
}

/// Dev-style parameters with a 1ms lock backoff
pub fn test_params() -> RunParameters {
    let mut params = RunParameters::defaults(true);
    params.min_profit_threshold_usd = Decimal::from(5);
    params.lock_retry_delay = Duration::from_millis(1);
    params
}

pub struct MockVault {
    can_harvest: AtomicBool,
    pending_yield: U256,
    underlying_decimals: u8,
    reward_decimals: u8,
    can_harvest_error: Option<String>,
    decimals_error: Option<String>,
    harvest_error: Option<String>,
    receipt: Result<ReceiptStatus, String>,
    harvest_delay: Duration,
    harvest_calls: AtomicUsize,
    decimals_calls: AtomicUsize,
    last_min_out: Mutex<Option<(U256, u64)>>,
}

impl MockVault {
    /// Harvestable 6-decimal underlying, 8-decimal reward, 100 units pending, mines successfully.
    pub fn new() -> Self {
        Self {
            can_harvest: AtomicBool::new(true),
            pending_yield: U256::from(100_000_000u64),
            underlying_decimals: 6,
            reward_decimals: 8,
            can_harvest_error: None,
            decimals_error: None,
            harvest_error: None,
            receipt: Ok(ReceiptStatus::Success),
            harvest_delay: Duration::ZERO,
            harvest_calls: AtomicUsize::new(0),
            decimals_calls: AtomicUsize::new(0),
            last_min_out: Mutex::new(None),
        }
    }

    pub fn with_can_harvest(self, can_harvest: bool) -> Self {
        self.can_harvest.store(can_harvest, Ordering::SeqCst);
        self
    }

    pub fn with_yield(mut self, pending_yield: U256) -> Self {
        self.pending_yield = pending_yield;
        self
    }

    pub fn with_decimals(mut self, underlying: u8, reward: u8) -> Self {
        self.underlying_decimals = underlying;
        self.reward_decimals = reward;
        self
    }

    pub fn with_can_harvest_error(mut self, message: &str) -> Self {
        self.can_harvest_error = Some(message.to_string());
        self
    }

    pub fn with_decimals_error(mut self, message: &str) -> Self {
        self.decimals_error = Some(message.to_string());
        self
    }

    pub fn with_harvest_error(mut self, message: &str) -> Self {
        self.harvest_error = Some(message.to_string());
        self
    }

    pub fn with_receipt(mut self, receipt: Result<ReceiptStatus, String>) -> Self {
        self.receipt = receipt;
        self
    }

    pub fn with_harvest_delay(mut self, delay: Duration) -> Self {
        self.harvest_delay = delay;
        self
    }

    pub fn set_can_harvest(&self, can_harvest: bool) {
        self.can_harvest.store(can_harvest, Ordering::SeqCst);
    }

    pub fn harvest_calls(&self) -> usize {
        self.harvest_calls.load(Ordering::SeqCst)
    }

    pub fn decimals_calls(&self) -> usize {
        self.decimals_calls.load(Ordering::SeqCst)
    }

    /// `(minOut, gasLimit)` of the latest harvest call
    pub fn last_harvest_args(&self) -> Option<(U256, u64)> {
        *self.last_min_out.lock().unwrap()
    }
}

#[async_trait]
impl VaultClient for MockVault {
    async fn can_harvest(&self) -> Result<(bool, U256)> {
        if let Some(message) = &self.can_harvest_error {
            return Err(anyhow!(message.clone()));
        }
        Ok((self.can_harvest.load(Ordering::SeqCst), self.pending_yield))
    }

    async fn underlying_token(&self) -> Result<Address> {
        Ok(UNDERLYING)
    }

    async fn reward_token(&self) -> Result<Address> {
        Ok(REWARD)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        self.decimals_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.decimals_error {
            return Err(anyhow!(message.clone()));
        }
        if token == UNDERLYING {
            Ok(self.underlying_decimals)
        } else {
            Ok(self.reward_decimals)
        }
    }

    async fn harvest(&self, min_out: U256, gas_limit: u64) -> Result<TxHash> {
        self.harvest_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_min_out.lock().unwrap() = Some((min_out, gas_limit));
        if !self.harvest_delay.is_zero() {
            tokio::time::sleep(self.harvest_delay).await;
        }
        match &self.harvest_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(TX_HASH),
        }
    }

    async fn wait_for_receipt(&self, _hash: TxHash) -> Result<ReceiptStatus> {
        self.receipt.clone().map_err(|e| anyhow!(e))
    }
}

pub struct MockPricing {
    underlying: Decimal,
    reward: Decimal,
    fail: bool,
    calls: AtomicUsize,
}

impl MockPricing {
    pub fn new(underlying: Decimal, reward: Decimal) -> Self {
        Self {
            underlying,
            reward,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Decimal::ONE, Decimal::ONE)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for MockPricing {
    async fn underlying_price(&self, _token: Address) -> Result<Decimal, PriceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PriceError::MissingUsdPrice);
        }
        Ok(self.underlying)
    }

    async fn reward_price(&self, _token: Address) -> Result<Decimal, PriceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PriceError::MissingUsdPrice);
        }
        Ok(self.reward)
    }
}

/// Captures every delivered message
#[derive(Default)]
pub struct RecordingChannel {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    async fn send(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("chat endpoint unreachable"));
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
