//! Vault read/write surface
//!
//! `VaultClient` is the only way the harvest pipeline touches the chain:
//! eligibility and token metadata reads, the harvest transaction, and the
//! receipt wait. `OnChainVault` implements it over any alloy Provider that
//! carries a signing wallet.
//!
//! Created: 2026-10-03

use crate::contracts::{IErnVault, IERC20};
use crate::types::{ReceiptStatus, VaultInstance};
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Receipt polling cadence (mainnet blocks are ~12s)
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait VaultClient: Send + Sync {
    /// `(eligible, pendingYield)` as reported by the vault
    async fn can_harvest(&self) -> Result<(bool, U256)>;

    async fn underlying_token(&self) -> Result<Address>;

    async fn reward_token(&self) -> Result<Address>;

    async fn token_decimals(&self, token: Address) -> Result<u8>;

    /// Submit `harvest(minOut)`; returns once the node accepted the transaction.
    async fn harvest(&self, min_out: U256, gas_limit: u64) -> Result<TxHash>;

    /// Block until the transaction is mined.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<ReceiptStatus>;
}

/// Vault contract reached through an alloy provider
pub struct OnChainVault<P> {
    provider: P,
    address: Address,
    receipt_timeout: Duration,
}

impl<P: Provider + Clone + 'static> OnChainVault<P> {
    pub fn new(provider: P, address: Address, receipt_timeout: Duration) -> Self {
        Self {
            provider,
            address,
            receipt_timeout,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Read the bound token addresses and build the immutable vault identity.
    pub async fn resolve_instance(&self, id: String) -> Result<VaultInstance> {
        let underlying = self.underlying_token().await?;
        let reward_token = self.reward_token().await?;
        Ok(VaultInstance::new(id, self.address, underlying, reward_token))
    }
}

#[async_trait]
impl<P: Provider + Clone + 'static> VaultClient for OnChainVault<P> {
    async fn can_harvest(&self) -> Result<(bool, U256)> {
        let vault = IErnVault::new(self.address, self.provider.clone());
        let result = vault
            .canHarvest()
            .call()
            .await
            .context("canHarvest() call failed")?;
        Ok((result.eligible, result.pendingYield))
    }

    async fn underlying_token(&self) -> Result<Address> {
        let vault = IErnVault::new(self.address, self.provider.clone());
        vault
            .UNDERLYING()
            .call()
            .await
            .context("UNDERLYING() call failed")
    }

    async fn reward_token(&self) -> Result<Address> {
        let vault = IErnVault::new(self.address, self.provider.clone());
        vault
            .REWARD_TOKEN()
            .call()
            .await
            .context("REWARD_TOKEN() call failed")
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        let erc20 = IERC20::new(token, self.provider.clone());
        erc20
            .decimals()
            .call()
            .await
            .with_context(|| format!("decimals() call failed for {:?}", token))
    }

    async fn harvest(&self, min_out: U256, gas_limit: u64) -> Result<TxHash> {
        let vault = IErnVault::new(self.address, self.provider.clone());
        let pending = vault
            .harvest(min_out)
            .gas(gas_limit)
            .send()
            .await
            .context("harvest() submission failed")?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<ReceiptStatus> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .context("eth_getTransactionReceipt failed")?;

            if let Some(receipt) = receipt {
                debug!(?hash, block = ?receipt.block_number(), "Receipt received");
                return Ok(if receipt.status() {
                    ReceiptStatus::Success
                } else {
                    ReceiptStatus::Reverted
                });
            }

            if Instant::now() >= deadline {
                anyhow::bail!(
                    "No receipt for {:?} after {}s",
                    hash,
                    self.receipt_timeout.as_secs()
                );
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
