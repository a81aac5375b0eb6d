//! IOExecutor: private to the engine, turns placement and
//! cancellation into asynchronous exchange calls without blocking the
//! writer. Real mode wraps the CLOB REST port; dry-run mode simulates fills
//! against the live order book.
//!
//! Grounded on `polymarket/executor.rs`'s `place_post_only_order`/
//! `handle_place_bid` for real mode, and on
//! `polymarket/legacy/order_manager.rs`'s best-ask/best-bid comparisons for
//! dry-run (re-specified per its exact strict/non-strict inequality
//! rule rather than copied verbatim — see DESIGN.md).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{Order, OrderStatus, OrderType, Side, TokenType};
use crate::errors::IoExecutorError;
use crate::ports::clob::{ClobRestClient, RemoteOrderStatus};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[async_trait]
pub trait IoExecutorPort: Send + Sync {
    async fn place_order(&self, order: Order) -> Result<Order, IoExecutorError>;
    async fn cancel_order(&self, order_id: String) -> Result<(), IoExecutorError>;
}

fn map_remote_status(status: RemoteOrderStatus, filled_size: f64, size: f64) -> OrderStatus {
    match status {
        RemoteOrderStatus::Matched if filled_size >= size && size > 0.0 => OrderStatus::Filled,
        RemoteOrderStatus::Matched => OrderStatus::Partial,
        RemoteOrderStatus::PartiallyFilled => OrderStatus::Partial,
        RemoteOrderStatus::Live | RemoteOrderStatus::Unmatched => OrderStatus::Open,
        RemoteOrderStatus::Cancelled => OrderStatus::Canceled,
    }
}

/// Real-mode IOExecutor: posts to the CLOB REST port.
pub struct RealIoExecutor {
    pub clob: Arc<dyn ClobRestClient>,
    /// Effective fee rate in bps (already substituted to 1000 if the
    /// configured default was 0 — see `ExchangeConfig::effective_fee_rate_bps`).
    pub fee_rate_bps: u32,
}

#[async_trait]
impl IoExecutorPort for RealIoExecutor {
    async fn place_order(&self, mut order: Order) -> Result<Order, IoExecutorError> {
        let resp = self
            .clob
            .post_order(&order, self.fee_rate_bps)
            .await
            .map_err(|e| IoExecutorError::Network(e.to_string()))?;

        if !resp.success {
            let msg = resp.error_msg.unwrap_or_else(|| "order rejected".to_string());
            return Err(IoExecutorError::ExchangeRejected(msg));
        }

        order.order_id = resp.order_id;
        if let Some(taking) = resp.taking_amount {
            order.filled_size = order.filled_size.max(taking);
        }
        order.status = map_remote_status(resp.status, order.filled_size, order.size);
        Ok(order)
    }

    async fn cancel_order(&self, order_id: String) -> Result<(), IoExecutorError> {
        self.clob
            .cancel_order(&order_id)
            .await
            .map_err(|e| {
                let text = e.to_string();
                if IoExecutorError::is_non_cancelable_class(&text) {
                    IoExecutorError::NonCancelable(text)
                } else {
                    IoExecutorError::Network(text)
                }
            })
    }
}

/// Live-book view the dry-run executor consults, implemented by
/// `market_quality::BestBookTracker`.
pub trait LiveBookView: Send + Sync {
    fn best_bid_ask(&self, token_type: TokenType) -> Option<(crate::domain::Price, crate::domain::Price)>;
}

/// Dry-run IOExecutor: never touches the network. FAK/FOK fill immediately;
/// GTC orders are checked against the live book.
pub struct DryRunIoExecutor {
    pub book: Arc<dyn LiveBookView>,
}

#[async_trait]
impl IoExecutorPort for DryRunIoExecutor {
    async fn place_order(&self, mut order: Order) -> Result<Order, IoExecutorError> {
        match order.order_type {
            OrderType::Fak | OrderType::Fok => {
                order.filled_size = order.size;
                order.filled_price = Some(order.price);
                order.status = OrderStatus::Filled;
                order.filled_at = Some(now_ms());
                Ok(order)
            }
            OrderType::Gtc => {
                let token_type = order.token_type.unwrap_or(TokenType::Up);
                let fills = match self.book.best_bid_ask(token_type) {
                    Some((bid, ask)) => match (order.side, order.is_entry_order) {
                        (Side::Buy, true) => ask.0 <= order.price.0,
                        (Side::Buy, false) => ask.0 < order.price.0,
                        (Side::Sell, true) => bid.0 >= order.price.0,
                        (Side::Sell, false) => bid.0 > order.price.0,
                    },
                    None => false,
                };
                if fills {
                    order.filled_size = order.size;
                    order.filled_price = Some(order.price);
                    order.status = OrderStatus::Filled;
                    order.filled_at = Some(now_ms());
                } else {
                    order.status = OrderStatus::Open;
                }
                Ok(order)
            }
        }
    }

    async fn cancel_order(&self, _order_id: String) -> Result<(), IoExecutorError> {
        Ok(())
    }
}
