use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::price::Price;

pub type OrderId = String;
pub type MarketSlug = String;
pub type AssetId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Good-till-canceled (default).
    Gtc,
    /// Fill-and-kill.
    Fak,
    /// Fill-or-kill.
    Fok,
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::Gtc
    }
}

/// Monotone order-status lattice: `pending -> open -> {partial, canceling}
/// -> {filled, canceled, failed}`.
///
/// A terminal status (`Filled`/`Canceled`/`Failed`) that carries its observed
/// timestamp is authoritative and may never be demoted. A terminal status
/// without a timestamp is "unconfirmed" and may still be reverted by a fresh
/// API observation (see `OrderSyncService`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    Partial,
    Canceling,
    Filled,
    Canceled,
    Failed,
}

impl OrderStatus {
    pub fn is_final(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Failed)
    }

    /// Relative strength used when resolving conflicting statuses during a
    /// merge: higher wins. Mirrors its stated priority order
    /// `filled > failed > canceled > canceling > open > partial > pending`.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Filled => 6,
            OrderStatus::Failed => 5,
            OrderStatus::Canceled => 4,
            OrderStatus::Canceling => 3,
            OrderStatus::Open => 2,
            OrderStatus::Partial => 1,
            OrderStatus::Pending => 0,
        }
    }

    pub fn strongest(self, other: OrderStatus) -> OrderStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub market_slug: MarketSlug,
    pub asset_id: AssetId,
    pub side: Side,
    pub price: Price,
    pub size: f64,
    pub filled_size: f64,
    pub filled_price: Option<Price>,
    pub status: OrderStatus,

    pub created_at: i64,
    pub filled_at: Option<i64>,
    pub canceled_at: Option<i64>,

    #[serde(default)]
    pub order_type: OrderType,

    // Strategy metadata. The engine never interprets these beyond routing;
    // they are identifiers only, never owning references.
    pub token_type: Option<TokenType>,
    pub grid_level: Option<i32>,
    pub is_entry_order: bool,
    pub pair_order_id: Option<OrderId>,
    pub hedge_order_id: Option<OrderId>,

    // Precision hints used by the IOExecutor when signing.
    pub tick_size: Option<Price>,
    pub neg_risk: bool,

    /// Diagnostic only: the last IO error text observed for this order (set
    /// when an async placement/cancel fails). Not part of its
    /// Order fields; carried so `TradingService`'s risk-off trigger can
    /// classify rate-limit/timeout errors without the engine
    /// needing a separate side channel back to the caller.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Order {
    pub fn new(
        market_slug: MarketSlug,
        asset_id: AssetId,
        side: Side,
        price: Price,
        size: f64,
    ) -> Self {
        Order {
            order_id: String::new(),
            market_slug,
            asset_id,
            side,
            price,
            size,
            filled_size: 0.0,
            filled_price: None,
            status: OrderStatus::Pending,
            created_at: now_ms(),
            filled_at: None,
            canceled_at: None,
            order_type: OrderType::default(),
            token_type: None,
            grid_level: None,
            is_entry_order: false,
            pair_order_id: None,
            hedge_order_id: None,
            tick_size: None,
            neg_risk: false,
            last_error: None,
        }
    }

    pub fn remaining_size(&self) -> f64 {
        (self.size - self.filled_size).max(0.0)
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_final()
    }

    pub fn notional(&self) -> f64 {
        self.price.as_decimal() * self.size
    }
}

pub fn local_order_id() -> OrderId {
    format!("local_{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_rank_order_matches_spec() {
        assert!(OrderStatus::Filled.rank() > OrderStatus::Failed.rank());
        assert!(OrderStatus::Failed.rank() > OrderStatus::Canceled.rank());
        assert!(OrderStatus::Canceled.rank() > OrderStatus::Canceling.rank());
        assert!(OrderStatus::Canceling.rank() > OrderStatus::Open.rank());
        assert!(OrderStatus::Open.rank() > OrderStatus::Partial.rank());
        assert!(OrderStatus::Partial.rank() > OrderStatus::Pending.rank());
    }

    #[test]
    fn strongest_never_downgrades() {
        assert_eq!(OrderStatus::Filled.strongest(OrderStatus::Open), OrderStatus::Filled);
        assert_eq!(OrderStatus::Pending.strongest(OrderStatus::Open), OrderStatus::Open);
    }

    #[test]
    fn remaining_size_floors_at_zero() {
        let mut o = Order::new("m".into(), "a".into(), Side::Buy, Price::from_cents(50), 10.0);
        o.filled_size = 12.0; // shouldn't happen, but must not go negative
        assert_eq!(o.remaining_size(), 0.0);
    }
}
