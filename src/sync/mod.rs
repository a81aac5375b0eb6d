//! OrderSyncService: periodic drift repair between the
//! engine's local view, the REST `open orders` snapshot, and the exchange's
//! per-order state. Cycle-filtered — only orders belonging to the current
//! market/generation are ever touched.
//!
//! Grounded on `polymarket/legacy/order_manager.rs`'s `sync`/`find_matching`/
//! `matches` shape (index-then-match over open orders), generalised from
//! "is this desired order already working" to "does the local record match
//! what the exchange reports".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SyncConfig;
use crate::domain::{reconcile_delta_trade_id, MarketSlug, Order, OrderId, OrderStatus, Side, Trade};
use crate::engine::command::{Command, Gen, QueryKind};
use crate::engine::order_engine::OrderEngineHandle;
use crate::errors::SyncError;
use crate::ports::clob::{ClobRestClient, RemoteOrder, RemoteOrderStatus};

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

struct CycleContext {
    market_slug: MarketSlug,
    generation: Gen,
}

pub struct OrderSyncService {
    engine: OrderEngineHandle,
    clob: std::sync::Arc<dyn ClobRestClient>,
    config: SyncConfig,
    dry_run: AtomicBool,
    cycle: Mutex<CycleContext>,
}

impl OrderSyncService {
    pub fn new(engine: OrderEngineHandle, clob: std::sync::Arc<dyn ClobRestClient>, config: SyncConfig) -> Self {
        OrderSyncService {
            engine,
            clob,
            config,
            dry_run: AtomicBool::new(false),
            cycle: Mutex::new(CycleContext { market_slug: String::new(), generation: 1 }),
        }
    }

    pub fn with_dry_run(self, dry_run: bool) -> Self {
        self.dry_run.store(dry_run, Ordering::Release);
        self
    }

    /// Called by `TradingService::set_current_market` so the reconciler
    /// only ever touches the active cycle's orders.
    pub fn set_cycle(&self, market_slug: MarketSlug, generation: Gen) {
        let mut c = self.cycle.lock();
        c.market_slug = market_slug;
        c.generation = generation;
    }

    fn current_cycle(&self) -> (MarketSlug, Gen) {
        let c = self.cycle.lock();
        (c.market_slug.clone(), c.generation)
    }

    /// Runs the 1s-resolution ticker: fires every `interval_with_orders`
    /// while the current cycle has open orders, else `interval_without_orders`.
    pub async fn run(self: std::sync::Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut last_run = tokio::time::Instant::now() - Duration::from_secs(3600);
        loop {
            tick.tick().await;
            let has_orders = !self.active_orders().await.is_empty();
            let interval = if has_orders { self.config.interval_with_orders() } else { self.config.interval_without_orders() };
            if last_run.elapsed() < interval {
                continue;
            }
            last_run = tokio::time::Instant::now();
            if let Err(e) = self.reconcile_once().await {
                tracing::warn!("reconcile pass failed: {e}");
            }
        }
    }

    async fn active_orders(&self) -> Vec<Order> {
        let (slug, _) = self.current_cycle();
        self.engine
            .query_state(QueryKind::OpenOrders, None, None)
            .await
            .open_orders
            .into_iter()
            .filter(|o| o.market_slug == slug)
            .collect()
    }

    /// One reconciliation pass.
    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        let (slug, gen) = self.current_cycle();
        if slug.is_empty() {
            return Ok(());
        }

        let local_orders = self.active_orders().await;
        let remote = self.clob.get_open_orders().await.map_err(|e| SyncError::FetchFailed(e.to_string()))?;

        let by_id: HashMap<&OrderId, &RemoteOrder> = remote.iter().map(|r| (&r.order_id, r)).collect();
        let mut by_attr: HashMap<(String, String, i32), &RemoteOrder> = HashMap::new();
        for r in &remote {
            by_attr.insert((r.asset_id.clone(), r.side.clone(), r.price.0), r);
        }

        for local in &local_orders {
            self.reconcile_one(local, &by_id, &by_attr, &remote, gen).await;
        }
        Ok(())
    }

    async fn reconcile_one(
        &self,
        local: &Order,
        by_id: &HashMap<&OrderId, &RemoteOrder>,
        by_attr: &HashMap<(String, String, i32), &RemoteOrder>,
        remote: &[RemoteOrder],
        gen: Gen,
    ) {
        let on_rest = by_id.get(&local.order_id).copied();

        if local.status.is_final() {
            if local.filled_at.is_some() || local.canceled_at.is_some() {
                // confirmed terminal: a lingering REST listing is just a
                // log-worthy inconsistency, never acted on.
                if on_rest.is_some() {
                    tracing::warn!("order {} is confirmed terminal locally but REST still lists it open", local.order_id);
                }
                return;
            }
            // unconfirmed terminal: the API is authoritative.
            if let Some(r) = on_rest {
                self.revert_to_open(local, r, gen).await;
            } else {
                self.confirm_terminal_timestamp(local, gen).await;
            }
            return;
        }

        if let Some(r) = on_rest {
            // REST id matches: accept pending->open as the normal transition.
            if local.status == OrderStatus::Pending {
                self.push_update(local.order_id.clone(), None, gen, |o| {
                    o.status = OrderStatus::Open;
                }, Some(r));
            }
            return;
        }

        let key = (local.asset_id.clone(), side_str(local.side).to_string(), local.price.0);
        if let Some(r) = by_attr.get(&key) {
            self.rekey(local, r, gen).await;
            return;
        }

        if let Some(r) = self.business_rule_match(local, remote) {
            self.rekey(local, r, gen).await;
            return;
        }

        let has_real_server_id = !local.order_id.starts_with("local_");
        if local.status == OrderStatus::Pending && !has_real_server_id {
            self.mark_failed(local, "placement never reached the exchange book (unmatched on reconcile)", gen).await;
            return;
        }

        let age_ms = now_ms() - local.created_at;
        if age_ms as u64 >= self.config.stale_pending_age_secs * 1000 {
            if let Err(e) = self.sync_order_status(&local.order_id).await {
                tracing::debug!("single-order sync for stale order {} failed: {e}", local.order_id);
            }
        }
    }

    /// Business-rule match: among REST
    /// orders on the same asset/side with price within ±2 cents, prefer
    /// the closest match, weighted by whether the local order's price sits
    /// in the entry or hedge band.
    fn business_rule_match<'a>(&self, local: &Order, remote: &'a [RemoteOrder]) -> Option<&'a RemoteOrder> {
        let local_cents = (local.price.as_cents()).round() as i32;
        let (entry_lo, entry_hi) = self.config.entry_price_band_cents;
        let (hedge_lo, hedge_hi) = self.config.hedge_price_band_cents;
        let in_entry_band = (entry_lo..=entry_hi).contains(&local_cents);
        let in_hedge_band = (hedge_lo..=hedge_hi).contains(&local_cents);
        if !in_entry_band && !in_hedge_band {
            return None;
        }

        remote
            .iter()
            .filter(|r| r.asset_id == local.asset_id && r.side == side_str(local.side))
            .filter_map(|r| {
                let delta_cents = (r.price.as_cents() - local.price.as_cents()).abs();
                if delta_cents > 2.0 {
                    None
                } else {
                    Some((r, 1.0 / (1.0 + delta_cents)))
                }
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(r, _)| r)
    }

    async fn revert_to_open(&self, local: &Order, _remote: &RemoteOrder, gen: Gen) {
        self.push_update(local.order_id.clone(), None, gen, |o| {
            o.status = OrderStatus::Open;
        }, None);
    }

    async fn confirm_terminal_timestamp(&self, local: &Order, gen: Gen) {
        let status = local.status;
        self.push_update(local.order_id.clone(), None, gen, move |o| {
            o.status = status;
            let ts = Some(now_ms());
            if status == OrderStatus::Filled {
                o.filled_at = ts;
            } else {
                o.canceled_at = ts;
            }
        }, None);
    }

    async fn rekey(&self, local: &Order, remote: &RemoteOrder, gen: Gen) {
        let mut incoming = local.clone();
        incoming.order_id = remote.order_id.clone();
        incoming.status = map_rest_status(remote, incoming.size);
        incoming.filled_size = incoming.filled_size.max(remote.size_matched);
        let cmd = Command::UpdateOrder {
            gen,
            order: incoming,
            error: None,
            original_order_id: Some(local.order_id.clone()),
        };
        let _ = self.engine.sender().send(cmd).await;
    }

    async fn mark_failed(&self, local: &Order, reason: &str, gen: Gen) {
        self.push_update(local.order_id.clone(), Some(reason.to_string()), gen, |o| {
            o.status = OrderStatus::Failed;
        }, None);
    }

    fn build_update_command(&self, order_id: OrderId, error: Option<String>, gen: Gen, mutate: impl FnOnce(&mut Order), remote: Option<&RemoteOrder>) -> Command {
        let mut order = Order::new(String::new(), String::new(), Side::Buy, crate::domain::Price::ZERO, 0.0);
        order.order_id = order_id.clone();
        if let Some(r) = remote {
            order.asset_id = r.asset_id.clone();
            order.price = r.price;
            order.filled_size = r.size_matched;
        }
        mutate(&mut order);
        Command::UpdateOrder { gen, order, error, original_order_id: None }
    }

    fn push_update(&self, order_id: OrderId, error: Option<String>, gen: Gen, mutate: impl FnOnce(&mut Order), remote: Option<&RemoteOrder>) {
        let cmd = self.build_update_command(order_id, error, gen, mutate, remote);
        let tx = self.engine.sender();
        tokio::spawn(async move {
            let _ = tx.send(cmd).await;
        });
    }

    /// `SyncOrderStatus`: single-order GET, delta-trade
    /// synthesis when the exchange reports more matched size than the local
    /// record, defensively clamped against pathological API responses.
    pub async fn sync_order_status(&self, order_id: &OrderId) -> anyhow::Result<()> {
        let (_, gen) = self.current_cycle();
        let remote = self.clob.get_order(order_id).await.map_err(|e| {
            SyncError::SingleOrderSyncFailed { order_id: order_id.clone(), reason: e.to_string() }
        })?;

        let local_snapshot = self.engine.query_state(QueryKind::Order, Some(order_id.clone()), None).await.order;
        let local_filled = local_snapshot.as_ref().map(|o| o.filled_size).unwrap_or(0.0);
        let local_size = local_snapshot.as_ref().map(|o| o.size).unwrap_or(remote.original_size);

        // Defensive cap: a matched size more than 1.5x
        // the local order size is treated as a pathological API response and
        // clamped down to the local size rather than trusted.
        let effective_matched = if remote.size_matched > local_size * 1.5 {
            local_size
        } else {
            remote.size_matched
        };

        if effective_matched > local_filled {
            let delta = effective_matched - local_filled;
            let trade = Trade {
                id: reconcile_delta_trade_id(order_id, effective_matched),
                order_id: order_id.clone(),
                asset_id: remote.asset_id.clone(),
                side: local_snapshot.as_ref().map(|o| o.side).unwrap_or(Side::Buy),
                price: remote.price,
                size: delta,
                token_type: local_snapshot.as_ref().and_then(|o| o.token_type),
                time: now_ms(),
                market: local_snapshot.as_ref().map(|o| o.market_slug.clone()),
                fee: None,
            };
            self.engine.process_trade(gen, trade).await;
        }

        let dry_run = self.dry_run.load(Ordering::Acquire);
        match remote.status {
            RemoteOrderStatus::Cancelled => {
                self.push_update(order_id.clone(), None, gen, |o| {
                    o.status = OrderStatus::Canceled;
                }, Some(&remote));
            }
            RemoteOrderStatus::Matched if !dry_run && effective_matched >= local_size && local_size > 0.0 => {
                self.push_update(order_id.clone(), None, gen, |o| {
                    o.status = OrderStatus::Filled;
                }, Some(&remote));
            }
            _ => {}
        }

        Ok(())
    }
}

fn map_rest_status(remote: &RemoteOrder, local_size: f64) -> OrderStatus {
    match remote.status {
        RemoteOrderStatus::Cancelled => OrderStatus::Canceled,
        RemoteOrderStatus::Matched if remote.size_matched >= local_size && local_size > 0.0 => OrderStatus::Filled,
        RemoteOrderStatus::Matched | RemoteOrderStatus::PartiallyFilled => OrderStatus::Partial,
        RemoteOrderStatus::Live | RemoteOrderStatus::Unmatched => OrderStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Price;
    use crate::engine::io_executor::DryRunIoExecutor;
    use crate::engine::order_engine::{spawn, OrderEngineConfig};
    use crate::market_quality::BestBookTracker;
    use crate::ports::clob::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubClob {
        open_orders: Vec<RemoteOrder>,
    }

    #[async_trait]
    impl ClobRestClient for StubClob {
        async fn get_order_book(&self, _asset_id: &String) -> anyhow::Result<RemoteOrderBook> {
            Ok(RemoteOrderBook::default())
        }
        async fn get_open_orders(&self) -> anyhow::Result<Vec<RemoteOrder>> {
            Ok(self.open_orders.clone())
        }
        async fn get_order(&self, order_id: &String) -> anyhow::Result<RemoteOrder> {
            self.open_orders.iter().find(|o| &o.order_id == order_id).cloned().ok_or_else(|| anyhow::anyhow!("not found"))
        }
        async fn post_order(&self, _order: &Order, _fee_rate_bps: u32) -> anyhow::Result<OrderResponse> {
            anyhow::bail!("not implemented")
        }
        async fn cancel_order(&self, _order_id: &String) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_balance_allowance(&self) -> anyhow::Result<BalanceAllowance> {
            Ok(BalanceAllowance { balance: 0.0, allowance: 0.0 })
        }
        async fn get_address(&self) -> anyhow::Result<String> {
            Ok("0xabc".to_string())
        }
        async fn fetch_market_from_gamma(&self, _slug: &String) -> anyhow::Result<crate::domain::Market> {
            anyhow::bail!("not implemented")
        }
    }

    fn make_engine() -> OrderEngineHandle {
        let best_book = Arc::new(BestBookTracker::new());
        let io = Arc::new(DryRunIoExecutor { book: best_book });
        spawn(OrderEngineConfig { dry_run: true, ..Default::default() }, io)
    }

    #[tokio::test]
    async fn single_order_sync_synthesises_delta_trade_on_partial_fill() {
        let engine = make_engine();
        let order = Order::new("m".into(), "a".into(), Side::Buy, Price::from_cents(50), 10.0);
        let placed = engine.place_order(1, order).await.unwrap();

        let remote = RemoteOrder {
            order_id: placed.order_id.clone(),
            asset_id: "a".into(),
            side: "BUY".into(),
            price: Price::from_cents(50),
            original_size: 10.0,
            size_matched: 4.0,
            status: RemoteOrderStatus::PartiallyFilled,
        };
        let clob: Arc<dyn ClobRestClient> = Arc::new(StubClob { open_orders: vec![remote] });
        let sync = OrderSyncService::new(engine.clone(), clob, SyncConfig::from_env());
        sync.set_cycle("m".into(), 1);

        sync.sync_order_status(&placed.order_id).await.unwrap();

        let fetched = engine.query_state(QueryKind::Order, Some(placed.order_id.clone()), None).await.order.unwrap();
        assert_eq!(fetched.filled_size, 4.0);
    }

    #[tokio::test]
    async fn single_order_sync_clamps_pathological_matched_size() {
        let engine = make_engine();
        let order = Order::new("m".into(), "a".into(), Side::Buy, Price::from_cents(50), 10.0);
        let placed = engine.place_order(1, order).await.unwrap();

        let remote = RemoteOrder {
            order_id: placed.order_id.clone(),
            asset_id: "a".into(),
            side: "BUY".into(),
            price: Price::from_cents(50),
            original_size: 10.0,
            size_matched: 100.0, // far beyond 1.5x local size
            status: RemoteOrderStatus::Matched,
        };
        let clob: Arc<dyn ClobRestClient> = Arc::new(StubClob { open_orders: vec![remote] });
        let sync = OrderSyncService::new(engine.clone(), clob, SyncConfig::from_env());
        sync.set_cycle("m".into(), 1);

        sync.sync_order_status(&placed.order_id).await.unwrap();

        let fetched = engine.query_state(QueryKind::Order, Some(placed.order_id.clone()), None).await.order.unwrap();
        assert_eq!(fetched.filled_size, 10.0, "matched size beyond 1.5x local must clamp to local size");
    }

    #[tokio::test]
    async fn business_rule_match_prefers_closest_within_band() {
        let local = Order::new("m".into(), "a".into(), Side::Buy, Price::from_cents(65), 10.0);
        let remote = vec![
            RemoteOrder { order_id: "s1".into(), asset_id: "a".into(), side: "BUY".into(), price: Price::from_cents(66), original_size: 10.0, size_matched: 0.0, status: RemoteOrderStatus::Live },
            RemoteOrder { order_id: "s2".into(), asset_id: "a".into(), side: "BUY".into(), price: Price::from_cents(64), original_size: 10.0, size_matched: 0.0, status: RemoteOrderStatus::Live },
        ];
        let clob: Arc<dyn ClobRestClient> = Arc::new(StubClob { open_orders: vec![] });
        let svc = OrderSyncService::new(make_engine(), clob, SyncConfig::from_env());
        let found = svc.business_rule_match(&local, &remote);
        assert!(found.is_some());
    }
}
