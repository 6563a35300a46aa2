//! Harvest Decision Engine
//!
//! Decides whether a vault is worth harvesting right now and, if so, the
//! slippage-protected minimum reward output to pass to `harvest(minOut)`.
//!
//! Check order (first failure wins, none of them is an error):
//!   1. canHarvest() / pending yield         (on-chain, cheap)
//!   2. token decimals                       (on-chain, cached)
//!   3. USD prices                           (price API)
//!   4. minOut > 0 after slippage
//!   5. minOut value >= profit threshold
//!
//! All math is done in `Decimal`; the final minOut is floored to reward base units.
//!
//! Created: 2026-10-03

use crate::config::RunParameters;
use crate::pricing::PriceSource;
use crate::types::{Evaluation, IneligibleReason, VaultInstance};
use crate::vault::VaultClient;
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// 100% in basis points
pub const SLIPPAGE_BASIS_POINTS: u32 = 10_000;

/// Intermediate values of the minOut computation, kept for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapMath {
    pub swap_in_usd: Decimal,
    pub expected_out_amount: Decimal,
    pub min_out_amount: Decimal,
    /// Reward token base units
    pub min_out: U256,
    pub min_out_usd: Decimal,
}

/// Convert an integer token amount to whole tokens.
pub fn from_base_units(amount: U256, decimals: u8) -> Result<Decimal> {
    let raw: i128 = amount
        .to_string()
        .parse()
        .with_context(|| format!("amount {} exceeds i128", amount))?;
    Decimal::try_from_i128_with_scale(raw, decimals as u32)
        .with_context(|| format!("amount {} with {} decimals exceeds Decimal range", amount, decimals))
}

fn pow10(exp: u8) -> Result<Decimal> {
    let mut value = Decimal::ONE;
    for _ in 0..exp {
        value = value
            .checked_mul(Decimal::TEN)
            .ok_or_else(|| anyhow!("10^{} exceeds Decimal range", exp))?;
    }
    Ok(value)
}

/// Slippage-protected minimum output for swapping `pending_yield` underlying into the reward token.
pub fn compute_min_out(
    pending_yield: U256,
    underlying_decimals: u8,
    reward_decimals: u8,
    underlying_price_usd: Decimal,
    reward_price_usd: Decimal,
    slippage_tolerance_bps: u32,
) -> Result<SwapMath> {
    if reward_price_usd <= Decimal::ZERO {
        return Err(anyhow!("reward price must be positive, got {}", reward_price_usd));
    }
    if slippage_tolerance_bps > SLIPPAGE_BASIS_POINTS {
        return Err(anyhow!("slippage {} bps exceeds 100%", slippage_tolerance_bps));
    }

    let swap_in = from_base_units(pending_yield, underlying_decimals)?;
    let swap_in_usd = swap_in
        .checked_mul(underlying_price_usd)
        .ok_or_else(|| anyhow!("swapInUsd overflow"))?;

    let expected_out_amount = swap_in_usd
        .checked_div(reward_price_usd)
        .ok_or_else(|| anyhow!("expectedOut overflow"))?;
    // Single division so the floor below isn't skewed by a rounded intermediate.
    let denominator = Decimal::from(SLIPPAGE_BASIS_POINTS)
        .checked_mul(reward_price_usd)
        .ok_or_else(|| anyhow!("minOut overflow"))?;
    let min_out_amount = swap_in_usd
        .checked_mul(Decimal::from(SLIPPAGE_BASIS_POINTS - slippage_tolerance_bps))
        .and_then(|numerator| numerator.checked_div(denominator))
        .ok_or_else(|| anyhow!("minOut overflow"))?;

    let min_out_base = min_out_amount
        .checked_mul(pow10(reward_decimals)?)
        .ok_or_else(|| anyhow!("minOut overflow"))?
        .floor();
    let min_out = min_out_base
        .to_u128()
        .map(U256::from)
        .ok_or_else(|| anyhow!("minOut {} not representable", min_out_base))?;

    let min_out_usd = min_out_amount
        .checked_mul(reward_price_usd)
        .ok_or_else(|| anyhow!("minOutUsd overflow"))?;

    Ok(SwapMath {
        swap_in_usd,
        expected_out_amount,
        min_out_amount,
        min_out,
        min_out_usd,
    })
}

/// Per-vault eligibility and profit gate
pub struct DecisionEngine {
    params: RunParameters,
    pricing: Arc<dyn PriceSource>,
    decimals_cache: DashMap<Address, u8>,
}

impl DecisionEngine {
    pub fn new(params: RunParameters, pricing: Arc<dyn PriceSource>) -> Self {
        Self {
            params,
            pricing,
            decimals_cache: DashMap::new(),
        }
    }

    /// Run the checks against the vault's current on-chain state.
    ///
    /// `Err` only for RPC/price failures; skips are `Ok(Evaluation::Ineligible(_))`.
    pub async fn evaluate(&self, vault: &VaultInstance, client: &dyn VaultClient) -> Result<Evaluation> {
        let (can_harvest, pending_yield) = client.can_harvest().await?;

        if !can_harvest {
            debug!(vault = %vault.id, "harvest skipped: canHarvest=false");
            return Ok(Evaluation::Ineligible(IneligibleReason::NotHarvestable));
        }
        if pending_yield.is_zero() {
            debug!(vault = %vault.id, "harvest skipped: yield=0");
            return Ok(Evaluation::Ineligible(IneligibleReason::ZeroYield));
        }

        let underlying_decimals = self.decimals(client, vault.underlying).await?;
        let reward_decimals = self.decimals(client, vault.reward_token).await?;

        let underlying_price = self.pricing.underlying_price(vault.underlying).await?;
        let reward_price = self.pricing.reward_price(vault.reward_token).await?;

        let math = compute_min_out(
            pending_yield,
            underlying_decimals,
            reward_decimals,
            underlying_price,
            reward_price,
            self.params.slippage_tolerance_bps,
        )?;

        debug!(
            vault = %vault.id,
            swap_in = %pending_yield,
            swap_in_usd = %math.swap_in_usd,
            expected_out = %math.expected_out_amount,
            min_out = %math.min_out,
            min_out_usd = %math.min_out_usd,
            "Swap math"
        );

        if math.min_out.is_zero() {
            warn!(vault = %vault.id, "harvest skipped: minOut=0");
            return Ok(Evaluation::Ineligible(IneligibleReason::MinOutZero));
        }

        if math.min_out_usd < self.params.min_profit_threshold_usd {
            debug!(
                vault = %vault.id,
                min_out_usd = %math.min_out_usd,
                threshold = %self.params.min_profit_threshold_usd,
                "harvest skipped: below profit threshold"
            );
            return Ok(Evaluation::Ineligible(IneligibleReason::BelowProfitThreshold {
                min_out_usd: math.min_out_usd,
            }));
        }

        Ok(Evaluation::Eligible { min_out: math.min_out })
    }

    async fn decimals(&self, client: &dyn VaultClient, token: Address) -> Result<u8> {
        if let Some(cached) = self.decimals_cache.get(&token) {
            return Ok(*cached);
        }
        let decimals = client.token_decimals(token).await?;
        self.decimals_cache.insert(token, decimals);
        Ok(decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::test_support::{test_params, test_vault, MockPricing, MockVault};
    use rust_decimal_macros::dec;

    fn engine(threshold: Decimal, pricing: Arc<MockPricing>) -> DecisionEngine {
        let mut params = test_params();
        params.min_profit_threshold_usd = threshold;
        DecisionEngine::new(params, pricing)
    }

    #[test]
    fn test_scenario_a_dust_rounds_to_zero() {
        // 10 base units of a 6-decimal stable = 0.00001 USD
        let math = compute_min_out(U256::from(10u64), 6, 8, dec!(1), dec!(120000), 100).unwrap();
        assert_eq!(math.swap_in_usd, dec!(0.00001));
        assert_eq!(math.expected_out_amount, dec!(0.00001) / dec!(120000));
        assert_eq!(math.min_out_amount, dec!(0.0000000000825));
        assert!(math.min_out_amount < math.expected_out_amount);
        assert_eq!(math.min_out, U256::ZERO);
    }

    #[test]
    fn test_scenario_b_ten_dollars() {
        let math =
            compute_min_out(U256::from(10_000_000u64), 6, 8, dec!(1), dec!(120000), 100).unwrap();
        assert_eq!(math.swap_in_usd, dec!(10));
        // 10 / 120000 * 0.99 = 0.0000825 WBTC = 8250 sats
        assert_eq!(math.min_out, U256::from(8250u64));
        assert_eq!(math.min_out_amount, dec!(0.0000825));
        assert_eq!(math.min_out_usd, dec!(9.9));
    }

    #[test]
    fn test_min_out_never_exceeds_expected() {
        let expected_base = |m: &SwapMath| (m.expected_out_amount * dec!(100000000)).floor();
        for bps in 1..=1000u32 {
            let math =
                compute_min_out(U256::from(123_456_789u64), 6, 8, dec!(1.0003), dec!(97123.45), bps)
                    .unwrap();
            let min_out: Decimal = math.min_out.to_string().parse().unwrap();
            assert!(min_out <= expected_base(&math), "bps={}", bps);
            assert!(math.min_out_amount < math.expected_out_amount, "bps={}", bps);
        }
    }

    #[test]
    fn test_eighteen_decimal_tokens() {
        // 1500 DAI -> WETH @ $3000, 50 bps
        let yield_amount = U256::from(1_500u64) * U256::from(10u64).pow(U256::from(18u64));
        let math = compute_min_out(yield_amount, 18, 18, dec!(1), dec!(3000), 50).unwrap();
        assert_eq!(math.swap_in_usd, dec!(1500));
        assert_eq!(math.min_out_amount, dec!(0.4975));
        assert_eq!(math.min_out, U256::from(497_500_000_000_000_000u128));
    }

    #[test]
    fn test_zero_reward_price_rejected() {
        assert!(compute_min_out(U256::from(1u64), 6, 8, dec!(1), dec!(0), 100).is_err());
    }

    #[test]
    fn test_tiny_reward_price_overflow_is_error() {
        let tiny = dec!(0.0000000000000000000000000001);
        let result = compute_min_out(U256::from(10_000_000u64), 6, 18, dec!(1), tiny, 100);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tiny_reward_price_evaluate_is_error() {
        let client = MockVault::new().with_yield(U256::from(10_000_000u64));
        let pricing = MockPricing::new(dec!(1), dec!(0.0000000000000000000000000001));
        let engine = engine(dec!(0), Arc::new(pricing));
        assert!(engine.evaluate(&test_vault(), &client).await.is_err());
    }

    #[tokio::test]
    async fn test_scenario_b_threshold_gate() {
        let vault = test_vault();

        let client = MockVault::new().with_yield(U256::from(10_000_000u64));
        let strict = engine(dec!(50), Arc::new(MockPricing::new(dec!(1), dec!(120000))));
        let result = strict.evaluate(&vault, &client).await.unwrap();
        assert!(matches!(
            result,
            Evaluation::Ineligible(IneligibleReason::BelowProfitThreshold { .. })
        ));

        let lenient = engine(dec!(5), Arc::new(MockPricing::new(dec!(1), dec!(120000))));
        let result = lenient.evaluate(&vault, &client).await.unwrap();
        assert_eq!(result, Evaluation::Eligible { min_out: U256::from(8250u64) });
    }

    #[tokio::test]
    async fn test_scenario_a_min_out_zero() {
        let client = MockVault::new().with_yield(U256::from(10u64));
        let engine = engine(dec!(0), Arc::new(MockPricing::new(dec!(1), dec!(120000))));
        let result = engine.evaluate(&test_vault(), &client).await.unwrap();
        assert_eq!(result, Evaluation::Ineligible(IneligibleReason::MinOutZero));
    }

    #[tokio::test]
    async fn test_scenario_c_not_harvestable_skips_oracle() {
        let pricing = Arc::new(MockPricing::new(dec!(1), dec!(120000)));
        let client = MockVault::new()
            .with_can_harvest(false)
            .with_yield(U256::from(10_000_000_000u64));
        let engine = engine(dec!(0), Arc::clone(&pricing));

        let result = engine.evaluate(&test_vault(), &client).await.unwrap();
        assert_eq!(result, Evaluation::Ineligible(IneligibleReason::NotHarvestable));
        assert_eq!(pricing.calls(), 0);
        assert_eq!(client.decimals_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_yield_ineligible_regardless_of_prices() {
        for (underlying, reward) in [(dec!(1), dec!(120000)), (dec!(1000000), dec!(0.0001))] {
            let pricing = Arc::new(MockPricing::new(underlying, reward));
            let client = MockVault::new().with_yield(U256::ZERO);
            let engine = engine(dec!(0), Arc::clone(&pricing));
            let result = engine.evaluate(&test_vault(), &client).await.unwrap();
            assert_eq!(result, Evaluation::Ineligible(IneligibleReason::ZeroYield));
            assert_eq!(pricing.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_threshold_boundary_is_inclusive() {
        // $1/$1 with equal decimals: 10 units * 0.99 = exactly $9.90
        let client = MockVault::new()
            .with_yield(U256::from(10_000_000u64))
            .with_decimals(6, 6);

        let at = engine(dec!(9.9), Arc::new(MockPricing::new(dec!(1), dec!(1))));
        let result = at.evaluate(&test_vault(), &client).await.unwrap();
        assert_eq!(result, Evaluation::Eligible { min_out: U256::from(9_900_000u64) });

        let above = engine(dec!(9.91), Arc::new(MockPricing::new(dec!(1), dec!(1))));
        let result = above.evaluate(&test_vault(), &client).await.unwrap();
        assert_eq!(
            result,
            Evaluation::Ineligible(IneligibleReason::BelowProfitThreshold { min_out_usd: dec!(9.9) })
        );
    }

    #[tokio::test]
    async fn test_price_failure_propagates() {
        let client = MockVault::new().with_yield(U256::from(10_000_000u64));
        let engine = engine(dec!(0), Arc::new(MockPricing::failing()));
        assert!(engine.evaluate(&test_vault(), &client).await.is_err());
    }

    #[tokio::test]
    async fn test_decimals_cached() {
        let client = MockVault::new().with_yield(U256::from(10_000_000u64));
        let engine = engine(dec!(0), Arc::new(MockPricing::new(dec!(1), dec!(120000))));
        engine.evaluate(&test_vault(), &client).await.unwrap();
        engine.evaluate(&test_vault(), &client).await.unwrap();
        assert_eq!(client.decimals_calls(), 2);
    }
}
