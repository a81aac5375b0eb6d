//! Market WebSocket port: maintains the `AtomicBestBook`.
//! Out of scope as a concrete adapter; this trait is the seam
//! `market_quality::BestBookTracker` is driven through.

use crate::domain::Price;

#[derive(Debug, Clone, Copy, Default)]
pub struct BestBookTick {
    pub yes_bid_pips: Option<i32>,
    pub yes_ask_pips: Option<i32>,
    pub no_bid_pips: Option<i32>,
    pub no_ask_pips: Option<i32>,
    pub updated_at_ms: i64,
}

impl BestBookTick {
    pub fn yes_bid(&self) -> Option<Price> {
        self.yes_bid_pips.map(Price)
    }
    pub fn yes_ask(&self) -> Option<Price> {
        self.yes_ask_pips.map(Price)
    }
    pub fn no_bid(&self) -> Option<Price> {
        self.no_bid_pips.map(Price)
    }
    pub fn no_ask(&self) -> Option<Price> {
        self.no_ask_pips.map(Price)
    }
}

pub trait MarketWsSink: Send + Sync {
    fn on_book_tick(&self, tick: BestBookTick);
}
