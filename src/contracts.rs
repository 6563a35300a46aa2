//! Centralized Contract Definitions
//!
//! Solidity interfaces the harvest bot talks to, defined with alloy's `sol!`
//! macro. Each interface is annotated with `#[sol(rpc)]` so it generates a
//! contract instance type usable with any alloy Provider.
//!
//! Created: 2026-10-02

use alloy::sol;

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
    }
}

// ── Ern vault ─────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IErnVault {
        /// Whether a harvest is currently allowed and how much underlying yield is pending.
        function canHarvest() external view returns (bool eligible, uint256 pendingYield);

        /// Swap accrued yield into the reward token; reverts if output < minOut.
        function harvest(uint256 minOut) external;

        function UNDERLYING() external view returns (address);
        function REWARD_TOKEN() external view returns (address);
    }
}
