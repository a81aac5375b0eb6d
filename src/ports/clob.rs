//! CLOB REST client port. Out of scope per — the
//! concrete adapter is an external collaborator; this crate only defines the
//! interface the engine/services are written against, mirroring how
//! `polymarket/executor.rs` wraps `polymarket_client_sdk::clob::Client`
//! behind its own actor API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AssetId, Market, MarketSlug, Order, OrderId, Price};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteOrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl RemoteOrderBook {
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.iter().map(|l| l.price).max()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.iter().map(|l| l.price).min()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteOrderStatus {
    Live,
    Matched,
    PartiallyFilled,
    Cancelled,
    Unmatched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub order_id: OrderId,
    pub asset_id: AssetId,
    pub side: String,
    pub price: Price,
    pub original_size: f64,
    pub size_matched: f64,
    pub status: RemoteOrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: OrderId,
    pub status: RemoteOrderStatus,
    pub error_msg: Option<String>,
    pub taking_amount: Option<f64>,
    pub making_amount: Option<f64>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceAllowance {
    pub balance: f64,
    pub allowance: f64,
}

/// The CLOB REST surface the engine/services depend on. Concrete
/// implementations (e.g. wrapping `polymarket_client_sdk::clob::Client`)
/// live outside this crate's scope.
#[async_trait]
pub trait ClobRestClient: Send + Sync {
    async fn get_order_book(&self, asset_id: &AssetId) -> anyhow::Result<RemoteOrderBook>;
    async fn get_open_orders(&self) -> anyhow::Result<Vec<RemoteOrder>>;
    async fn get_order(&self, order_id: &OrderId) -> anyhow::Result<RemoteOrder>;
    async fn post_order(&self, order: &Order, fee_rate_bps: u32) -> anyhow::Result<OrderResponse>;
    async fn cancel_order(&self, order_id: &OrderId) -> anyhow::Result<()>;
    async fn get_balance_allowance(&self) -> anyhow::Result<BalanceAllowance>;
    async fn get_address(&self) -> anyhow::Result<String>;
    async fn fetch_market_from_gamma(&self, slug: &MarketSlug) -> anyhow::Result<Market>;
}
