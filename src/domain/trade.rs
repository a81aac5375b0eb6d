use serde::{Deserialize, Serialize};

use super::order::{AssetId, MarketSlug, OrderId, Side, TokenType};
use super::price::Price;

pub type TradeId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub asset_id: AssetId,
    pub side: Side,
    pub price: Price,
    pub size: f64,
    pub token_type: Option<TokenType>,
    pub time: i64,
    pub market: Option<MarketSlug>,
    pub fee: Option<f64>,
}

/// Deterministic id for a dry-run fill synthesised by the engine.
pub fn dry_run_trade_id(order_id: &str) -> TradeId {
    format!("dry_run_trade_{order_id}")
}

/// Delta-trade id synthesised by the reconciler.
pub fn reconcile_delta_trade_id(order_id: &str, size_matched: f64) -> TradeId {
    format!("reconcile:{order_id}:{size_matched}")
}
