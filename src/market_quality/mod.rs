//! MarketQuality / BestBook.
//!
//! A thin consumer of the market WebSocket's best-book ticks, with
//! freshness/spread/mirror-gap scoring and a REST top-of-book fallback.
//! Grounded on `polymarket/coordinator.rs`'s `Book`/`last_valid_book`
//! freshness-fallback pattern (`update_book`/`usable_book`) and
//! `polymarket/types.rs`'s `OrderBook::is_ready`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::domain::{AssetId, Price, TokenType};
use crate::engine::io_executor::LiveBookView;
use crate::ports::clob::ClobRestClient;
use crate::ports::market_ws::BestBookTick;

/// Best-book is stale if its last update is older than this.
pub const FRESHNESS_THRESHOLD_MS: i64 = 60_000;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketQuality {
    pub fresh: bool,
    /// `ask - bid` for the tighter of YES/NO, in pips. `None` if no book.
    pub spread_pips: Option<i32>,
    /// `|mid_yes + mid_no - 1.0|`, in pips; measures how far the two sides
    /// are from mirroring each other (a well-formed binary market should
    /// have `mid_yes + mid_no ≈ 1.0`).
    pub mirror_gap_pips: Option<i32>,
    pub age_ms: i64,
}

/// Holds the market WS's best-book as an atomic-ish snapshot: a single
/// mutex-guarded pointer the service reads, matching its
/// `AtomicBestBook` framing. No lock is ever held across an `.await`.
pub struct BestBookTracker {
    book: Mutex<BestBookTick>,
    last_updated_ms: AtomicI64,
}

impl Default for BestBookTracker {
    fn default() -> Self {
        BestBookTracker { book: Mutex::new(BestBookTick::default()), last_updated_ms: AtomicI64::new(0) }
    }
}

impl BestBookTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, tick: BestBookTick) {
        *self.book.lock() = tick;
        self.last_updated_ms.store(now_ms(), Ordering::Release);
    }

    pub fn snapshot(&self) -> BestBookTick {
        *self.book.lock()
    }

    pub fn age_ms(&self) -> i64 {
        let last = self.last_updated_ms.load(Ordering::Acquire);
        if last == 0 {
            i64::MAX
        } else {
            (now_ms() - last).max(0)
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.age_ms() <= FRESHNESS_THRESHOLD_MS
    }

    /// `GetTopOfBook`: best bid/ask for YES/NO, `None` if no tick has
    /// arrived yet (freshness is reported separately via `quality()`, not
    /// enforced here — callers decide whether stale-but-present data is
    /// still usable, matching the reference implementation's `usable_book` fallback).
    pub fn top_of_book(&self, token_type: TokenType) -> Option<(Price, Price)> {
        let tick = self.snapshot();
        match token_type {
            TokenType::Up => Some((tick.yes_bid()?, tick.yes_ask()?)),
            TokenType::Down => Some((tick.no_bid()?, tick.no_ask()?)),
        }
    }

    /// `GetBestPrice`: best opposing price (ask for a buyer, bid for a
    /// seller) for the given token, falling back to REST top-of-book when
    /// the WS snapshot is stale or absent.
    pub async fn best_price(
        &self,
        asset_id: &AssetId,
        token_type: TokenType,
        buy_side: bool,
        clob: &dyn ClobRestClient,
    ) -> anyhow::Result<Option<Price>> {
        if self.is_fresh() {
            if let Some((bid, ask)) = self.top_of_book(token_type) {
                return Ok(Some(if buy_side { ask } else { bid }));
            }
        }
        let book = clob.get_order_book(asset_id).await?;
        Ok(Some(if buy_side { book.best_ask().unwrap_or(Price::ONE) } else { book.best_bid().unwrap_or(Price::ZERO) }))
    }

    pub fn quality(&self) -> MarketQuality {
        let tick = self.snapshot();
        let age_ms = self.age_ms();
        let fresh = age_ms <= FRESHNESS_THRESHOLD_MS;

        let yes = tick.yes_bid().zip(tick.yes_ask());
        let no = tick.no_bid().zip(tick.no_ask());

        let spread_pips = yes
            .map(|(b, a)| a.0 - b.0)
            .into_iter()
            .chain(no.map(|(b, a)| a.0 - b.0))
            .min();

        let mirror_gap_pips = match (yes, no) {
            (Some((yb, ya)), Some((nb, na))) => {
                let mid_yes = (yb.0 + ya.0) / 2;
                let mid_no = (nb.0 + na.0) / 2;
                Some((mid_yes + mid_no - crate::domain::price::PIPS_PER_UNIT).abs())
            }
            _ => None,
        };

        MarketQuality { fresh, spread_pips, mirror_gap_pips, age_ms }
    }

    /// `CheckOrderBookLiquidity`: is there at least `min_size` resting on
    /// the side the caller is about to hit, within `max_levels` of the
    /// REST book?
    pub async fn check_liquidity(
        &self,
        clob: &dyn ClobRestClient,
        asset_id: &AssetId,
        buy_side: bool,
        min_size: f64,
        max_levels: usize,
    ) -> anyhow::Result<bool> {
        let book = clob.get_order_book(asset_id).await?;
        let levels = if buy_side { &book.asks } else { &book.bids };
        let total: f64 = levels.iter().take(max_levels).map(|l| l.size).sum();
        Ok(total >= min_size)
    }

    /// `GetSecondLevelPrice`: the second-best price on the requested side
    /// of the REST book, used by strategies that want to place behind the
    /// best quote. Returns the best price if only one level exists.
    pub async fn second_level_price(
        &self,
        clob: &dyn ClobRestClient,
        asset_id: &AssetId,
        buy_side: bool,
    ) -> anyhow::Result<Option<Price>> {
        let book = clob.get_order_book(asset_id).await?;
        let mut levels: Vec<Price> = if buy_side {
            book.asks.iter().map(|l| l.price).collect()
        } else {
            book.bids.iter().map(|l| l.price).collect()
        };
        if buy_side {
            levels.sort();
        } else {
            levels.sort_by(|a, b| b.cmp(a));
        }
        Ok(levels.get(1).or_else(|| levels.first()).copied())
    }
}

impl LiveBookView for BestBookTracker {
    fn best_bid_ask(&self, token_type: TokenType) -> Option<(Price, Price)> {
        self.top_of_book(token_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(yb: i32, ya: i32, nb: i32, na: i32) -> BestBookTick {
        BestBookTick {
            yes_bid_pips: Some(yb),
            yes_ask_pips: Some(ya),
            no_bid_pips: Some(nb),
            no_ask_pips: Some(na),
            updated_at_ms: now_ms(),
        }
    }

    #[test]
    fn fresh_tick_reports_fresh() {
        let t = BestBookTracker::new();
        t.update(tick(4900, 5000, 4800, 5000));
        assert!(t.is_fresh());
        assert!(t.quality().fresh);
    }

    #[test]
    fn no_tick_is_never_fresh() {
        let t = BestBookTracker::new();
        assert!(!t.is_fresh());
    }

    #[test]
    fn mirror_gap_is_zero_for_perfectly_mirrored_book() {
        let t = BestBookTracker::new();
        // mid_yes = 0.50, mid_no = 0.50 -> sum = 1.0 -> gap 0
        t.update(tick(4900, 5100, 4900, 5100));
        assert_eq!(t.quality().mirror_gap_pips, Some(0));
    }

    #[test]
    fn spread_is_min_across_both_sides() {
        let t = BestBookTracker::new();
        t.update(tick(4900, 5000, 4800, 5100));
        // yes spread = 100, no spread = 300 -> min = 100
        assert_eq!(t.quality().spread_pips, Some(100));
    }

    #[test]
    fn top_of_book_returns_none_without_both_sides() {
        let t = BestBookTracker::new();
        t.update(BestBookTick { yes_bid_pips: Some(4900), ..Default::default() });
        assert!(t.top_of_book(TokenType::Up).is_none());
    }
}
