//! The engine's command vocabulary.
//!
//! Grounded on `polymarket/messages.rs`'s `ExecutionCmd`/`OrderResult` enum
//! shape, generalised to the full command set the OrderEngine actor
//! consumes. Every command that mutates state carries a `Gen`; stale
//! generations are silently dropped by the engine.
//!
//! Reply channels are `tokio::sync::oneshot`. Unlike a Go buffered channel
//! with a `select`/timeout fallback, a oneshot send never blocks the engine
//! loop — it either succeeds or the receiver has already been dropped (the
//! caller timed out) and the send silently fails. This gives the same "never
//! stall the writer" property without needing an explicit 100ms fallback
//! select.

use tokio::sync::oneshot;

use crate::domain::{Order, OrderId, Position, PositionId, Trade};

pub type Gen = u64;
pub type Reply<T> = oneshot::Sender<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    AllOrders,
    OpenOrders,
    AllPositions,
    OpenPositions,
    Balance,
    Order,
    Position,
}

#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub balance: f64,
    pub orders: Vec<Order>,
    pub open_orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub open_positions: Vec<Position>,
    pub order: Option<Order>,
    pub position: Option<Position>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub generation: Gen,
    pub commands_processed: u64,
    pub errors_recovered: u64,
    pub open_orders_count: usize,
    pub positions_count: usize,
}

pub enum Command {
    PlaceOrder {
        gen: Gen,
        order: Order,
        reply: Reply<Result<Order, crate::errors::EngineError>>,
    },
    CancelOrder {
        gen: Gen,
        order_id: OrderId,
        reply: Reply<Result<(), crate::errors::EngineError>>,
    },
    /// Posted by the IOExecutor (or the reconciler) with the outcome of an
    /// async placement/cancel, or by the reconciler with a revised status.
    UpdateOrder {
        gen: Gen,
        order: Order,
        error: Option<String>,
        original_order_id: Option<OrderId>,
    },
    ProcessTrade {
        gen: Gen,
        trade: Trade,
    },
    UpdateBalance {
        balance: f64,
        currency: Option<String>,
    },
    CreatePosition {
        gen: Gen,
        position: Position,
        reply: Reply<Result<(), crate::errors::EngineError>>,
    },
    UpdatePosition {
        gen: Gen,
        position: Position,
        reply: Reply<Result<(), crate::errors::EngineError>>,
    },
    ClosePosition {
        gen: Gen,
        position_id: PositionId,
        exit_price: crate::domain::Price,
        exit_time: i64,
        reply: Reply<Result<(), crate::errors::EngineError>>,
    },
    QueryState {
        query: QueryKind,
        order_id: Option<OrderId>,
        position_id: Option<PositionId>,
        reply: Reply<StateSnapshot>,
    },
    QueryStats {
        reply: Reply<EngineStats>,
    },
    ResetCycle {
        new_market_slug: String,
        reason: String,
        new_generation: Gen,
        reply: Reply<Gen>,
    },
    RegisterHandler {
        handler: std::sync::Arc<dyn Fn(&Order) + Send + Sync>,
    },
}
