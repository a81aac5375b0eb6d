//! Error taxonomy for the trading core.
//!
//! Leaf errors are plain `thiserror` enums grounded in bog-core's
//! `core/errors.rs` style; application glue above the engine uses
//! `anyhow::Result` the way the reference implementation's `executor.rs` does.

use thiserror::Error;

/// Errors the engine returns synchronously from a command handler, before
/// any IO is dispatched. Category 1 and 2 of — never counted
/// against the circuit breaker.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("order is nil or market slug is empty")]
    InvalidOrder,
    #[error("size must be > 0")]
    InvalidSize,
    #[error("price must be > 0 pips")]
    InvalidPrice,
    #[error("price*size {notional} is below MinOrderSize {min_order_size}")]
    BelowMinOrderSize { notional: f64, min_order_size: f64 },
    #[error("balance {balance} is below required {required}")]
    InsufficientBalance { balance: f64, required: f64 },
    #[error("order {0} not found")]
    OrderNotFound(String),
    #[error("order {0} is already in a terminal state and cannot be canceled")]
    AlreadyTerminal(String),
    #[error("position {0} not found")]
    PositionNotFound(String),
    #[error("position {0} already exists")]
    PositionAlreadyExists(String),
    #[error("position {0} is already closed")]
    PositionAlreadyClosed(String),
    #[error("command generation {got} does not match current generation {want}; dropped")]
    StaleGeneration { got: u64, want: u64 },
}

/// Gate rejections raised by `TradingService` (category 2).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradingError {
    #[error("trading paused")]
    Paused,
    #[error("risk-off active")]
    RiskOff,
    #[error("order market mismatch: order={order_market} current={current_market}")]
    MarketMismatch {
        order_market: String,
        current_market: String,
    },
    #[error("circuit breaker open")]
    CircuitBreakerOpen,
    #[error("duplicate in-flight request")]
    InFlightDuplicate,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// IO/execution failures (category 4) and cancel-specific outcomes
/// (category 5).
#[derive(Debug, Clone, Error)]
pub enum IoExecutorError {
    #[error("network error: {0}")]
    Network(String),
    #[error("exchange rejected order: {0}")]
    ExchangeRejected(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("order is in a non-cancelable state: {0}")]
    NonCancelable(String),
}

impl IoExecutorError {
    /// Classifies the error text the way its `UpdateOrder`
    /// handler does: "non-cancelable" class covers exchange 400-style
    /// responses that mean the order was already terminal on the venue.
    pub fn is_non_cancelable_class(text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        lower.contains("non-cancelable")
            || lower.contains("not cancelable")
            || lower.contains("invalid payload")
            || lower.contains("400")
            || lower.contains("already filled")
            || lower.contains("already canceled")
    }

    /// Classifies whether an error looks like a rate-limit/timeout
    /// condition, used by `TradingService`'s risk-off trigger (5s vs 2s
    /// cooldown, ).
    pub fn looks_like_rate_limit(text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("timeout")
            || lower.contains("timed out")
    }
}

/// Reconciliation-layer errors (category 6, mostly logged not propagated).
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("REST open-orders fetch failed: {0}")]
    FetchFailed(String),
    #[error("single-order sync failed for {order_id}: {reason}")]
    SingleOrderSyncFailed { order_id: String, reason: String },
}

/// Snapshot load/save errors (category 7 — a miss falls back silently and is
/// not fatal).
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("no snapshot found for tag {0}")]
    NotFound(String),
    #[error("snapshot store io error: {0}")]
    Io(String),
    #[error("snapshot decode error: {0}")]
    Decode(String),
}
