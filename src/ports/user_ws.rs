//! User WebSocket port: delivers order/trade events and may
//! overflow, in which case the adapter should invoke drop-compensation.
//! Out of scope — concrete adapters live outside this crate (cf.
//! `polymarket/user_ws.rs` in the reference implementation, kept only as a grounding
//! reference, not wired in).

use crate::domain::{Order, Trade};

#[derive(Debug, Clone)]
pub enum UserWsEvent {
    OrderPlaced(Order),
    OrderFilled(Order),
    OrderCanceled(Order),
    Trade(Trade),
    /// The adapter detected it dropped events (dispatch queue overflow);
    /// the core should run `compensate_after_user_ws_drop`.
    Overflow { reason: String },
}

/// Callback surface a user-WS adapter drives the core through. The core
/// never owns the socket; it only reacts to events pushed in.
pub trait UserWsSink: Send + Sync {
    fn on_event(&self, event: UserWsEvent);
}
