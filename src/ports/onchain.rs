//! On-chain USDC balance probe: `POST
//! https://polygon-rpc.com`, JSON-RPC `eth_call` to the USDC contract
//! `0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174`, selector `balanceOf(address)`
//! -> uint256, decimals 6. Used by balance initialisation only.
//!
//! Out of scope as a concrete implementation; trait seam only, grounded on
//! the reference implementation's `alloy`-based signer/RPC stack (`polymarket/executor.rs`,
//! `init_clob_client`) for what a concrete adapter would use.

use async_trait::async_trait;

pub const USDC_CONTRACT_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
pub const USDC_DECIMALS: u32 = 6;

#[async_trait]
pub trait UsdcBalanceProbe: Send + Sync {
    /// Returns the USDC balance of `address`, in whole-dollar units (already
    /// divided by `10^USDC_DECIMALS`).
    async fn get_usdc_balance(&self, address: &str) -> anyhow::Result<f64>;
}
