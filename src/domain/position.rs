use serde::{Deserialize, Serialize};

use super::order::{AssetId, MarketSlug, OrderId, Side, TokenType};
use super::price::Price;

pub type PositionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub market_slug: MarketSlug,
    pub asset_id: AssetId,
    pub token_type: TokenType,

    pub entry_order: Option<OrderId>,
    pub entry_price: Price,
    pub entry_time: i64,

    pub size: f64,
    pub status: PositionStatus,

    pub exit_price: Option<Price>,
    pub exit_time: Option<i64>,
    pub exit_order: Option<OrderId>,

    /// Running cost basis, in dollars (`sum(price * size)` over processed
    /// fills).
    pub cost_basis: f64,
    /// `cost_basis / total_filled_size`.
    pub avg_price: Price,
    pub total_filled_size: f64,
}

pub fn position_id(market_slug: &str, asset_id: &str, token_type: TokenType) -> PositionId {
    let tt = match token_type {
        TokenType::Up => "UP",
        TokenType::Down => "DOWN",
    };
    format!("{market_slug}_{asset_id}_{tt}")
}

impl Position {
    pub fn new(
        market_slug: MarketSlug,
        asset_id: AssetId,
        token_type: TokenType,
        entry_order: Option<OrderId>,
        entry_price: Price,
        entry_time: i64,
    ) -> Self {
        Position {
            id: position_id(&market_slug, &asset_id, token_type),
            market_slug,
            asset_id,
            token_type,
            entry_order,
            entry_price,
            entry_time,
            size: 0.0,
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_order: None,
            cost_basis: 0.0,
            avg_price: entry_price,
            total_filled_size: 0.0,
        }
    }

    /// Folds a fill into the running cost-basis/avg-price accumulators.
    /// Called on both BUY and SELL per ("also `AddFill` so
    /// average cost/PnL accumulators remain consistent"); see DESIGN.md
    /// Open Question #2 for why sells are folded in too, literally as
    /// described rather than re-derived.
    pub fn add_fill(&mut self, size: f64, price: Price) {
        self.cost_basis += price.as_decimal() * size;
        self.total_filled_size += size;
        if self.total_filled_size > 0.0 {
            self.avg_price = Price::from_decimal(self.cost_basis / self.total_filled_size);
        }
    }

    /// Applies a trade fill to this position per its BUY/SELL
    /// rules, closing the position when size returns to zero on a sell.
    pub fn apply_fill(&mut self, side: Side, size: f64, price: Price, exit_order: Option<OrderId>, now: i64) {
        match side {
            Side::Buy => {
                self.size += size;
                self.add_fill(size, price);
            }
            Side::Sell => {
                self.size = (self.size - size).max(0.0);
                self.add_fill(size, price);
                if self.size == 0.0 && self.status == PositionStatus::Open {
                    self.exit_price = Some(price);
                    self.exit_time = Some(now);
                    self.exit_order = exit_order;
                    self.status = PositionStatus::Closed;
                }
            }
        }
    }

    pub fn close(&mut self, exit_price: Price, exit_time: i64, exit_order: Option<OrderId>) {
        self.status = PositionStatus::Closed;
        self.exit_price = Some(exit_price);
        self.exit_time = Some(exit_time);
        self.exit_order = exit_order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_id_format() {
        assert_eq!(position_id("x-15m-1000", "asset1", TokenType::Up), "x-15m-1000_asset1_UP");
    }

    #[test]
    fn buy_then_fill_matches_scenario_1() {
        let mut p = Position::new("x-15m-1000".into(), "asset1".into(), TokenType::Up, None, Price::from_cents(50), 0);
        p.apply_fill(Side::Buy, 10.0, Price::from_cents(50), None, 1);
        assert_eq!(p.size, 10.0);
        assert_eq!(p.avg_price.0, 5000);
        assert_eq!(p.cost_basis, 5.0);
    }

    #[test]
    fn partial_fills_weighted_average_matches_scenario_2() {
        let mut p = Position::new("x-15m-1000".into(), "asset1".into(), TokenType::Up, None, Price::from_cents(50), 0);
        p.apply_fill(Side::Buy, 4.0, Price::from_decimal(0.50), None, 1);
        p.apply_fill(Side::Buy, 6.0, Price::from_decimal(0.52), None, 2);
        assert_eq!(p.total_filled_size, 10.0);
        assert_eq!(p.avg_price.0, 5120);
    }

    #[test]
    fn sell_to_zero_closes_position() {
        let mut p = Position::new("m".into(), "a".into(), TokenType::Up, None, Price::from_cents(50), 0);
        p.apply_fill(Side::Buy, 5.0, Price::from_cents(50), None, 1);
        p.apply_fill(Side::Sell, 5.0, Price::from_cents(55), Some("exit1".into()), 2);
        assert_eq!(p.size, 0.0);
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.exit_price.unwrap().0, 5500);
        assert_eq!(p.exit_order.as_deref(), Some("exit1"));
    }

    #[test]
    fn sell_never_goes_negative() {
        let mut p = Position::new("m".into(), "a".into(), TokenType::Up, None, Price::from_cents(50), 0);
        p.apply_fill(Side::Sell, 5.0, Price::from_cents(50), None, 1);
        assert_eq!(p.size, 0.0);
    }
}
