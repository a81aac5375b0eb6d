pub mod market;
pub mod order;
pub mod position;
pub mod price;
pub mod trade;

pub use market::{token_from_slug, Market};
pub use order::{AssetId, MarketSlug, Order, OrderId, OrderStatus, OrderType, Side, TokenType};
pub use position::{position_id, Position, PositionId, PositionStatus};
pub use price::Price;
pub use trade::{dry_run_trade_id, reconcile_delta_trade_id, Trade, TradeId};
