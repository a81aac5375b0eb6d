//! TradingService: the façade. Applies gates (paused,
//! risk-off, current-market match, cycle isolation), routes to the engine
//! and ancillary services, owns the generation counter and current-market
//! info, exposes `ExecuteMultiLeg`, `PlaceOrder`, `CancelOrder`, and the
//! query surface lists.
//!
//! Grounded on `polymarket/coordinator.rs`'s gate sequence (global kill
//! switch check, debounce, state machine), generalised to the gate list
//! names; the similar-order short circuit has no direct
//! teacher analogue and is built straight from its tolerance numbers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::{RiskConfig, SyncConfig};
use crate::domain::{
    token_from_slug, Market, MarketSlug, Order, OrderId, OrderStatus, OrderType, Position,
    PositionId, Price, Side,
};
use crate::engine::command::{Gen, QueryKind};
use crate::engine::order_engine::OrderEngineHandle;
use crate::errors::{IoExecutorError, TradingError};
use crate::market_quality::{BestBookTracker, MarketQuality};
use crate::ports::clob::ClobRestClient;
use crate::safety::{CircuitBreaker, InFlightDeduper, SingleFlightThrottle};
use crate::sync::OrderSyncService;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

struct GateState {
    current_market: Option<Market>,
    generation: Gen,
    paused: bool,
    risk_off_until_ms: i64,
    min_order_size: f64,
    min_share_size: f64,
    funder_address: Option<String>,
    /// Mirrors its `orderStatusCache`: a light cache of the last
    /// observed status per order id, cleared on every cycle switch
    /// alongside the in-flight deduper so a stale cycle's entries never
    /// leak into the next one.
    order_status_cache: HashMap<OrderId, OrderStatus>,
}

pub struct TradingService {
    engine: OrderEngineHandle,
    clob: Arc<dyn ClobRestClient>,
    best_book: Arc<BestBookTracker>,
    circuit_breaker: Arc<CircuitBreaker>,
    sync: Arc<OrderSyncService>,
    risk: RiskConfig,
    state: Mutex<GateState>,
    in_flight: Mutex<InFlightDeduper>,
    drop_compensation: Mutex<SingleFlightThrottle>,
}

impl TradingService {
    pub fn new(
        engine: OrderEngineHandle,
        clob: Arc<dyn ClobRestClient>,
        best_book: Arc<BestBookTracker>,
        circuit_breaker: Arc<CircuitBreaker>,
        sync: Arc<OrderSyncService>,
        risk: RiskConfig,
    ) -> Self {
        TradingService {
            engine,
            clob,
            best_book,
            circuit_breaker,
            sync,
            in_flight: Mutex::new(InFlightDeduper::new(Duration::from_secs(10), 10_000)),
            drop_compensation: Mutex::new(SingleFlightThrottle::new(Duration::from_secs(2))),
            state: Mutex::new(GateState {
                current_market: None,
                generation: 1,
                paused: false,
                risk_off_until_ms: 0,
                min_order_size: risk.min_order_size,
                min_share_size: risk.min_share_size,
                funder_address: None,
                order_status_cache: HashMap::new(),
            }),
            risk,
        }
    }

    pub fn start(&self) {
        tracing::info!("trading service started");
    }

    pub fn stop(&self) {
        self.circuit_breaker.halt();
        tracing::info!("trading service stopped");
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    pub fn set_funder_address(&self, address: String) {
        self.state.lock().funder_address = Some(address);
    }

    pub fn set_min_order_size(&self, min: f64) {
        self.state.lock().min_order_size = min;
    }

    pub fn set_min_share_size(&self, min: f64) {
        self.state.lock().min_share_size = min;
    }

    pub fn current_generation(&self) -> Gen {
        self.state.lock().generation
    }

    pub fn current_market_info(&self) -> Option<Market> {
        self.state.lock().current_market.clone()
    }

    /// `SetCurrentMarket`/`SetCurrentMarketInfo`: switches
    /// the active cycle. A no-op slug change only updates market info; a
    /// real switch derives the new generation as
    /// `max(prevGen+1, tokenFromSlug(newSlug))`, resets the engine's
    /// per-cycle state, and clears the in-flight deduper and order-status
    /// cache so nothing from the old cycle leaks into the new one.
    pub async fn set_current_market(&self, market: Market) -> Gen {
        let prev_slug = self.state.lock().current_market.as_ref().map(|m| m.slug.clone());

        if prev_slug.as_deref() == Some(market.slug.as_str()) {
            self.state.lock().current_market = Some(market);
            return self.current_generation();
        }

        let (prev_gen, new_gen) = {
            let mut st = self.state.lock();
            let prev_gen = st.generation;
            let new_gen = prev_gen.max(prev_gen + 1).max(token_from_slug(&market.slug).max(0) as Gen);
            st.generation = new_gen;
            st.current_market = Some(market.clone());
            (prev_gen, new_gen)
        };

        tracing::info!("cycle switch: {:?} -> {} (gen {} -> {})", prev_slug, market.slug, prev_gen, new_gen);
        let confirmed = self
            .engine
            .reset_cycle(market.slug.clone(), "SetCurrentMarket".to_string(), new_gen)
            .await;
        self.state.lock().generation = confirmed;
        self.in_flight.lock().clear();
        self.state.lock().order_status_cache.clear();
        self.sync.set_cycle(market.slug.clone(), confirmed);
        confirmed
    }

    fn gate_check(&self, order: &Order) -> Result<Gen, TradingError> {
        let st = self.state.lock();
        if st.paused {
            return Err(TradingError::Paused);
        }
        if st.risk_off_until_ms > now_ms() {
            return Err(TradingError::RiskOff);
        }
        let current_slug = st.current_market.as_ref().map(|m| m.slug.as_str()).unwrap_or("");
        if order.market_slug.is_empty() || current_slug.is_empty() || order.market_slug != current_slug {
            return Err(TradingError::MarketMismatch {
                order_market: order.market_slug.clone(),
                current_market: current_slug.to_string(),
            });
        }
        if !self.circuit_breaker.allow_trading() {
            return Err(TradingError::CircuitBreakerOpen);
        }
        Ok(st.generation)
    }

    fn placement_fingerprint(order: &Order) -> String {
        let side = match order.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let order_type = match order.order_type {
            OrderType::Gtc => "GTC",
            OrderType::Fak => "FAK",
            OrderType::Fok => "FOK",
        };
        InFlightDeduper::placement_key(
            &order.market_slug,
            &order.asset_id,
            side,
            order.price.0 / 100,
            order.size,
            order_type,
        )
    }

    /// Scans open orders for a same (market, asset, side) GTC order whose
    /// price is within ±1 cent and size within `max(0.5, 2%)` of the
    /// requested order. Only applies to GTC placements.
    async fn find_similar_open_order(&self, order: &Order) -> Option<Order> {
        if order.order_type != OrderType::Gtc {
            return None;
        }
        let snap = self.engine.query_state(QueryKind::OpenOrders, None, None).await;
        snap.open_orders.into_iter().find(|o| {
            o.market_slug == order.market_slug
                && o.asset_id == order.asset_id
                && o.side == order.side
                && o.order_type == OrderType::Gtc
                && (o.price.0 - order.price.0).abs() <= 100
                && (o.size - order.size).abs() <= (order.size * 0.02).max(0.5)
        })
    }

    /// `PlaceOrder`: applies all gates, the similar-order
    /// short circuit, and the in-flight deduper, then routes to the
    /// engine. On a non-excluded failure, trips the risk-off cooldown.
    pub async fn place_order(&self, mut order: Order) -> Result<Order, TradingError> {
        let gen = self.gate_check(&order)?;

        if order.side == Side::Buy && order.order_type == OrderType::Gtc {
            let min_share = self.state.lock().min_share_size;
            if order.size < min_share {
                order.size = min_share;
            }
        }

        if let Some(existing) = self.find_similar_open_order(&order).await {
            return Ok(existing);
        }

        let key = Self::placement_fingerprint(&order);
        {
            let mut deduper = self.in_flight.lock();
            deduper.try_acquire(&key).map_err(|_| TradingError::InFlightDuplicate)?;
        }

        let result = self.engine.place_order(gen, order).await;

        match &result {
            Ok(placed) if placed.status == OrderStatus::Failed => {
                self.in_flight.lock().release(&key);
                self.on_place_failure(placed.last_error.as_deref().unwrap_or(""));
            }
            Err(_) => {
                self.in_flight.lock().release(&key);
                // category 1/2 (invalid input / below-min-order / insufficient
                // balance) is never counted against the circuit breaker.
            }
            Ok(_) => {}
        }

        result.map_err(TradingError::from)
    }

    /// Risk-off trigger: any place failure that isn't
    /// duplicate-in-flight, insufficient-balance, a gate rejection, or
    /// circuit-breaker-open increments the breaker and opens a short
    /// cooldown — 5s for errors that look like a rate limit/timeout, 2s
    /// otherwise.
    fn on_place_failure(&self, error_text: &str) {
        self.circuit_breaker.on_error();
        let cooldown_secs = if IoExecutorError::looks_like_rate_limit(error_text) {
            self.risk.risk_off_rate_limit_secs
        } else {
            self.risk.risk_off_default_secs
        };
        self.state.lock().risk_off_until_ms = now_ms() + (cooldown_secs as i64) * 1000;
    }

    /// `CancelOrder`: idempotent — a
    /// terminal or already-canceling target returns `Ok(())` rather than an
    /// error, deduped on `cancel|<orderID>`.
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<(), TradingError> {
        let gen = self.current_generation();
        let key = InFlightDeduper::cancel_key(&order_id);
        {
            let mut deduper = self.in_flight.lock();
            if deduper.try_acquire(&key).is_err() {
                return Ok(());
            }
        }
        let result = self.engine.cancel_order(gen, order_id).await;
        match result {
            Ok(()) => {
                self.in_flight.lock().release(&key);
                Ok(())
            }
            Err(crate::errors::EngineError::AlreadyTerminal(_)) => {
                self.in_flight.lock().release(&key);
                Ok(())
            }
            Err(e) => {
                // Do not release: a repeat cancel on the same key within the
                // dedup window is treated as an idempotent no-op per
                // §4.4, not retried against the engine.
                Err(TradingError::Engine(e))
            }
        }
    }

    pub async fn cancel_orders_for_market(&self, market_slug: &str) -> usize {
        let snap = self.engine.query_state(QueryKind::OpenOrders, None, None).await;
        let mut n = 0;
        for o in snap.open_orders.into_iter().filter(|o| o.market_slug == market_slug) {
            if self.cancel_order(o.order_id).await.is_ok() {
                n += 1;
            }
        }
        n
    }

    pub async fn cancel_orders_not_in_market(&self, market_slug: &str) -> usize {
        let snap = self.engine.query_state(QueryKind::OpenOrders, None, None).await;
        let mut n = 0;
        for o in snap.open_orders.into_iter().filter(|o| o.market_slug != market_slug) {
            if self.cancel_order(o.order_id).await.is_ok() {
                n += 1;
            }
        }
        n
    }

    /// Cancels every order the exchange reports open, regardless of local
    /// tracking — a cleanup sweep that bypasses the engine since these may
    /// include orders the local process never placed (e.g. after a crash).
    pub async fn cancel_exchange_open_orders(&self) -> anyhow::Result<usize> {
        let remote = self.clob.get_open_orders().await?;
        let mut n = 0;
        for o in remote {
            if self.clob.cancel_order(&o.order_id).await.is_ok() {
                n += 1;
            }
        }
        Ok(n)
    }

    /// `ExecuteMultiLeg`: places each leg through the same gate sequence as
    /// a single `PlaceOrder`. The venue has no cross-order atomicity, so a
    /// failure partway through leaves earlier legs in place — callers are
    /// expected to use `PairOrderID`/`HedgeOrderID` to track and unwind if
    /// needed; this method does not roll back.
    pub async fn execute_multi_leg(&self, orders: Vec<Order>) -> Result<Vec<Order>, TradingError> {
        let mut placed = Vec::with_capacity(orders.len());
        for order in orders {
            placed.push(self.place_order(order).await?);
        }
        Ok(placed)
    }

    pub async fn get_active_orders(&self) -> Vec<Order> {
        self.engine.query_state(QueryKind::OpenOrders, None, None).await.open_orders
    }

    pub async fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.engine.query_state(QueryKind::Order, Some(order_id), None).await.order
    }

    pub async fn get_position(&self, position_id: PositionId) -> Option<Position> {
        self.engine.query_state(QueryKind::Position, None, Some(position_id)).await.position
    }

    pub async fn get_open_positions_for_market(&self, market_slug: &str) -> Vec<Position> {
        self.engine
            .query_state(QueryKind::OpenPositions, None, None)
            .await
            .open_positions
            .into_iter()
            .filter(|p| p.market_slug == market_slug)
            .collect()
    }

    fn token_type_for_asset(&self, asset_id: &str) -> crate::domain::TokenType {
        use crate::domain::TokenType;
        match self.state.lock().current_market.as_ref() {
            Some(m) if m.no_asset_id == asset_id => TokenType::Down,
            _ => TokenType::Up,
        }
    }

    pub async fn get_best_price(&self, asset_id: &str, buy_side: bool) -> anyhow::Result<Option<Price>> {
        let token_type = self.token_type_for_asset(asset_id);
        self.best_book.best_price(&asset_id.to_string(), token_type, buy_side, self.clob.as_ref()).await
    }

    pub fn get_top_of_book(&self, _market_slug: &str) -> crate::ports::market_ws::BestBookTick {
        self.best_book.snapshot()
    }

    pub fn get_market_quality(&self) -> MarketQuality {
        self.best_book.quality()
    }

    pub async fn check_order_book_liquidity(&self, asset_id: &str, buy_side: bool, min_size: f64) -> anyhow::Result<bool> {
        self.best_book.check_liquidity(self.clob.as_ref(), &asset_id.to_string(), buy_side, min_size, 5).await
    }

    pub async fn get_second_level_price(&self, asset_id: &str, buy_side: bool) -> anyhow::Result<Option<Price>> {
        self.best_book.second_level_price(self.clob.as_ref(), &asset_id.to_string(), buy_side).await
    }

    pub async fn refresh_balance(&self) -> anyhow::Result<f64> {
        let balance_allowance = self.clob.get_balance_allowance().await?;
        self.engine.update_balance(balance_allowance.balance, Some("USDC".to_string())).await;
        Ok(balance_allowance.balance)
    }

    /// Drop-compensation: invoked by the user-WS adapter
    /// when its dispatch queue overflows. Throttled to at most one run per
    /// 2s, single-flight, reconciles at most 50 orders of the current
    /// cycle with a 40ms inter-call sleep under a 15s overall timeout.
    pub async fn compensate_after_user_ws_drop(&self, reason: &str) {
        {
            let mut throttle = self.drop_compensation.lock();
            if !throttle.try_start() {
                tracing::debug!("drop-compensation skipped (throttled or already running): {reason}");
                return;
            }
        }
        tracing::warn!("user-WS drop detected ({reason}); running compensation reconciliation");

        let sync = self.sync.clone();
        let snap = self.engine.query_state(QueryKind::OpenOrders, None, None).await;
        let order_ids: Vec<OrderId> = snap.open_orders.into_iter().take(50).map(|o| o.order_id).collect();

        let run = async move {
            for order_id in order_ids {
                let _ = sync.sync_order_status(&order_id).await;
                tokio::time::sleep(Duration::from_millis(40)).await;
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(15), run).await;
        self.drop_compensation.lock().finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Market, Order, Price, Side};
    use crate::engine::io_executor::DryRunIoExecutor;
    use crate::engine::order_engine::{spawn, OrderEngineConfig};
    use crate::market_quality::BestBookTracker;
    use crate::ports::clob::*;
    use crate::safety::CircuitBreakerConfig;
    use async_trait::async_trait;

    struct NullClob;

    #[async_trait]
    impl ClobRestClient for NullClob {
        async fn get_order_book(&self, _asset_id: &String) -> anyhow::Result<RemoteOrderBook> {
            Ok(RemoteOrderBook::default())
        }
        async fn get_open_orders(&self) -> anyhow::Result<Vec<RemoteOrder>> {
            Ok(vec![])
        }
        async fn get_order(&self, _order_id: &String) -> anyhow::Result<RemoteOrder> {
            anyhow::bail!("not implemented")
        }
        async fn post_order(&self, _order: &Order, _fee_rate_bps: u32) -> anyhow::Result<OrderResponse> {
            anyhow::bail!("not implemented")
        }
        async fn cancel_order(&self, _order_id: &String) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_balance_allowance(&self) -> anyhow::Result<BalanceAllowance> {
            Ok(BalanceAllowance { balance: 100.0, allowance: 100.0 })
        }
        async fn get_address(&self) -> anyhow::Result<String> {
            Ok("0xabc".to_string())
        }
        async fn fetch_market_from_gamma(&self, _slug: &String) -> anyhow::Result<Market> {
            anyhow::bail!("not implemented")
        }
    }

    fn make_service() -> TradingService {
        let best_book = Arc::new(BestBookTracker::new());
        let io = Arc::new(DryRunIoExecutor { book: best_book.clone() });
        let engine = spawn(OrderEngineConfig { dry_run: true, ..Default::default() }, io);
        let clob: Arc<dyn ClobRestClient> = Arc::new(NullClob);
        let cb = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let risk = RiskConfig {
            min_order_size: 1.0,
            min_share_size: 5.0,
            max_consecutive_errors: 5,
            daily_loss_limit_cents: None,
            circuit_breaker_cooldown_secs: 60,
            risk_off_rate_limit_secs: 5,
            risk_off_default_secs: 2,
        };
        let sync = Arc::new(OrderSyncService::new(engine.clone(), clob.clone(), SyncConfig::from_env()));
        TradingService::new(engine, clob, best_book, cb, sync, risk)
    }

    fn market(slug: &str) -> Market {
        Market {
            slug: slug.to_string(),
            yes_asset_id: "yes1".to_string(),
            no_asset_id: "no1".to_string(),
            condition_id: "c1".to_string(),
            question: "q".to_string(),
            timestamp: 1000,
        }
    }

    #[tokio::test]
    async fn place_order_rejects_market_mismatch() {
        let svc = make_service();
        svc.set_current_market(market("x-15m-1000")).await;
        let order = Order::new("other-market".into(), "yes1".into(), Side::Buy, Price::from_cents(50), 10.0);
        let result = svc.place_order(order).await;
        assert!(matches!(result, Err(TradingError::MarketMismatch { .. })));
    }

    #[tokio::test]
    async fn place_order_rejects_while_paused() {
        let svc = make_service();
        svc.set_current_market(market("x-15m-1000")).await;
        svc.pause();
        let order = Order::new("x-15m-1000".into(), "yes1".into(), Side::Buy, Price::from_cents(50), 10.0);
        let result = svc.place_order(order).await;
        assert!(matches!(result, Err(TradingError::Paused)));
    }

    #[tokio::test]
    async fn cycle_switch_increases_generation_and_drops_stale_commands() {
        let svc = make_service();
        let gen_a = svc.set_current_market(market("a-1000")).await;
        let order = Order::new("a-1000".into(), "yes1".into(), Side::Buy, Price::from_cents(50), 10.0);
        svc.place_order(order).await.unwrap();

        let gen_b = svc.set_current_market(market("b-2000")).await;
        assert!(gen_b > gen_a);
        assert!(gen_b >= 2000);

        let open = svc.get_active_orders().await;
        assert!(open.is_empty(), "cycle switch must clear open orders");
    }

    #[tokio::test]
    async fn cancel_order_is_idempotent_for_unknown_orders() {
        let svc = make_service();
        svc.set_current_market(market("x-15m-1000")).await;
        let result = svc.cancel_order("nonexistent".to_string()).await;
        assert!(result.is_err());
        // a second cancel on the same key within the dedup window is a no-op success
        let result2 = svc.cancel_order("nonexistent".to_string()).await;
        assert!(result2.is_ok());
    }
}
