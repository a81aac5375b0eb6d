//! SnapshotService: debounced persistence of engine state,
//! a startup load with a three-tier fallback chain, and a short-delay
//! exchange bootstrap.
//!
//! Grounded on `ports::persistence::FileStore`'s atomic temp-file+rename
//! store and `polymarket/coordinator.rs`'s debounce-then-save pattern,
//! generalised to the exact tag scheme and fallback chain //! names.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::SnapshotConfig;
use crate::domain::{MarketSlug, Order, Position};
use crate::engine::command::{Command, Gen, QueryKind};
use crate::engine::order_engine::OrderEngineHandle;
use crate::errors::EngineError;
use crate::ports::clob::ClobRestClient;
use crate::ports::persistence::FileStore;
use crate::safety::Debouncer;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SnapshotBody {
    updated_at: i64,
    balance: f64,
    open_orders: Vec<Order>,
    positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointerBody {
    updated_at: i64,
    market_slug: MarketSlug,
    gen: Gen,
    tag: String,
}

struct CycleContext {
    market_slug: MarketSlug,
    generation: Gen,
}

pub struct SnapshotService {
    engine: OrderEngineHandle,
    clob: Arc<dyn ClobRestClient>,
    config: SnapshotConfig,
    debouncer: Mutex<Debouncer>,
    notify: Notify,
    cycle: Mutex<CycleContext>,
}

impl SnapshotService {
    pub fn new(engine: OrderEngineHandle, clob: Arc<dyn ClobRestClient>, config: SnapshotConfig) -> Arc<Self> {
        let debounce_window = Duration::from_secs(config.debounce_secs);
        Arc::new(SnapshotService {
            engine,
            clob,
            config,
            debouncer: Mutex::new(Debouncer::new(debounce_window)),
            notify: Notify::new(),
            cycle: Mutex::new(CycleContext { market_slug: String::new(), generation: 1 }),
        })
    }

    pub fn set_cycle(&self, market_slug: MarketSlug, generation: Gen) {
        let mut c = self.cycle.lock();
        c.market_slug = market_slug;
        c.generation = generation;
    }

    fn current_cycle(&self) -> (MarketSlug, Gen) {
        let c = self.cycle.lock();
        (c.market_slug.clone(), c.generation)
    }

    fn store_for(&self, tag: &str) -> FileStore {
        FileStore::new(&self.config.storage_root, "trading", &self.config.persistence_id, tag)
    }

    /// Registers an engine order-update handler that signals the save loop.
    /// Every order mutation nudges the debounced save awake.
    pub fn install_save_trigger(self: &Arc<Self>) {
        let svc = self.clone();
        self.engine.register_handler(Arc::new(move |_order: &Order| {
            svc.notify.notify_one();
        }));
    }

    /// Runs until the process exits: wakes on every order-update signal,
    /// and actually saves only when the debounce window allows it.
    pub async fn run_save_loop(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            let should_fire = self.debouncer.lock().should_fire();
            if should_fire {
                if let Err(e) = self.save().await {
                    tracing::warn!("snapshot save failed: {e}");
                }
            }
        }
    }

    /// Queries positions, open orders, and balance from the engine (each
    /// under a 3s timeout) and writes both the per-cycle snapshot and the
    /// `snapshot_latest` pointer.
    pub async fn save(&self) -> anyhow::Result<()> {
        let (slug, gen) = self.current_cycle();
        if slug.is_empty() {
            return Ok(());
        }
        let timeout = Duration::from_secs(3);

        let balance = tokio::time::timeout(timeout, self.engine.query_state(QueryKind::Balance, None, None))
            .await
            .map(|s| s.balance)
            .unwrap_or(0.0);
        let open_orders = tokio::time::timeout(timeout, self.engine.query_state(QueryKind::OpenOrders, None, None))
            .await
            .map(|s| s.open_orders)
            .unwrap_or_default();
        let positions = tokio::time::timeout(timeout, self.engine.query_state(QueryKind::OpenPositions, None, None))
            .await
            .map(|s| s.open_positions)
            .unwrap_or_default();

        let body = SnapshotBody { updated_at: now_ms(), balance, open_orders, positions };
        let tag = format!("snapshot:{slug}:g{gen}");
        self.store_for(&tag).save(&body).await?;

        let pointer = PointerBody { updated_at: now_ms(), market_slug: slug, gen, tag };
        self.store_for("snapshot_latest").save(&pointer).await?;
        Ok(())
    }

    /// Startup load: `(currentSlug, currentGen)` tag first; on miss,
    /// `snapshot_latest` accepted only if it matches the current cycle;
    /// else the legacy untagged `snapshot` tag. Restores balance (if
    /// positive) and only orders/positions whose `MarketSlug` matches.
    pub async fn load(&self, current_slug: &str, current_gen: Gen) -> anyhow::Result<bool> {
        let primary_tag = format!("snapshot:{current_slug}:g{current_gen}");
        let body = if let Ok(b) = self.store_for(&primary_tag).load::<SnapshotBody>().await {
            Some(b)
        } else if let Ok(ptr) = self.store_for("snapshot_latest").load::<PointerBody>().await {
            if ptr.market_slug == current_slug && ptr.gen == current_gen {
                self.store_for(&ptr.tag).load::<SnapshotBody>().await.ok()
            } else {
                None
            }
        } else {
            None
        };
        let body = match body {
            Some(b) => b,
            None => match self.store_for("snapshot").load::<SnapshotBody>().await {
                Ok(b) => b,
                Err(_) => return Ok(false),
            },
        };

        if body.balance > 0.0 {
            self.engine.update_balance(body.balance, None).await;
        }

        for order in body.open_orders.into_iter().filter(|o| o.market_slug == current_slug) {
            let cmd = Command::UpdateOrder { gen: current_gen, order, error: None, original_order_id: None };
            let _ = self.engine.sender().send(cmd).await;
        }

        for mut position in body.positions {
            // Backfill a missing MarketSlug: the original source derives it
            // from Market.Slug or EntryOrder.MarketSlug; since this layer
            // only sees the restored Position itself, the current cycle's
            // slug is the only value available and is used as a best effort.
            if position.market_slug.is_empty() {
                position.market_slug = current_slug.to_string();
            }
            if position.market_slug != current_slug {
                continue;
            }
            match self.engine.create_position(current_gen, position.clone()).await {
                Ok(()) => {}
                Err(EngineError::PositionAlreadyExists(_)) => {
                    let _ = self.engine.update_position(current_gen, position).await;
                }
                Err(e) => tracing::warn!("failed to restore position {}: {e}", position.id),
            }
        }

        Ok(true)
    }

    /// Exchange bootstrap: after `delay`, pulls
    /// `GetOpenOrders` and injects each into the engine with the current
    /// generation. The REST port has no per-order market slug, so every
    /// injected order is tagged with the current market; a multi-market
    /// deployment would need the adapter to supply that mapping.
    pub async fn bootstrap_from_exchange(&self, current_slug: &str, current_gen: Gen, delay: Duration) {
        tokio::time::sleep(delay).await;
        let remote_orders = match self.clob.get_open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!("exchange bootstrap: GetOpenOrders failed: {e}");
                return;
            }
        };

        for remote in remote_orders {
            let mut order = Order::new(
                current_slug.to_string(),
                remote.asset_id.clone(),
                match remote.side.as_str() {
                    "SELL" => crate::domain::Side::Sell,
                    _ => crate::domain::Side::Buy,
                },
                remote.price,
                remote.original_size,
            );
            order.order_id = remote.order_id;
            order.filled_size = remote.size_matched;
            order.status = match remote.status {
                crate::ports::clob::RemoteOrderStatus::Cancelled => crate::domain::OrderStatus::Canceled,
                crate::ports::clob::RemoteOrderStatus::Matched if remote.size_matched >= order.size && order.size > 0.0 => {
                    crate::domain::OrderStatus::Filled
                }
                crate::ports::clob::RemoteOrderStatus::Matched | crate::ports::clob::RemoteOrderStatus::PartiallyFilled => {
                    crate::domain::OrderStatus::Partial
                }
                _ => crate::domain::OrderStatus::Open,
            };

            let cmd = Command::UpdateOrder { gen: current_gen, order, error: None, original_order_id: None };
            let _ = self.engine.sender().send(cmd).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, Price, Side};
    use crate::engine::io_executor::DryRunIoExecutor;
    use crate::engine::order_engine::{spawn, OrderEngineConfig};
    use crate::market_quality::BestBookTracker;
    use crate::ports::clob::*;
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

    fn temp_config() -> SnapshotConfig {
        SnapshotConfig {
            storage_root: std::env::temp_dir().join(format!("pm_grid_snap_{}", uuid::Uuid::new_v4())).to_string_lossy().to_string(),
            debounce_secs: 2,
            persistence_id: "trading_test".to_string(),
        }
    }

    #[tokio::test]
    async fn save_then_load_restores_balance_and_orders() {
        let engine = make_engine();
        let clob: Arc<dyn ClobRestClient> = Arc::new(NullClob);
        let svc = SnapshotService::new(engine.clone(), clob, temp_config());
        svc.set_cycle("m-1000".into(), 7);
        engine.reset_cycle("m-1000".into(), "test setup".into(), 7).await;

        engine.update_balance(42.0, None).await;
        let order = Order::new("m-1000".into(), "a".into(), Side::Buy, Price::from_cents(50), 10.0);
        engine.place_order(7, order).await.unwrap();

        svc.save().await.unwrap();

        let fresh_engine = make_engine();
        let clob2: Arc<dyn ClobRestClient> = Arc::new(NullClob);
        let svc2 = SnapshotService::new(fresh_engine.clone(), clob2, SnapshotConfig { storage_root: svc.config.storage_root.clone(), ..temp_config() });
        svc2.set_cycle("m-1000".into(), 7);
        fresh_engine.reset_cycle("m-1000".into(), "test setup".into(), 7).await;
        let restored = svc2.load("m-1000", 7).await.unwrap();
        assert!(restored);

        let snap = fresh_engine.query_state(QueryKind::Balance, None, None).await;
        assert_eq!(snap.balance, 42.0);

        let open = fresh_engine.query_state(QueryKind::OpenOrders, None, None).await.open_orders;
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn load_with_no_snapshot_returns_false() {
        let engine = make_engine();
        let clob: Arc<dyn ClobRestClient> = Arc::new(NullClob);
        let svc = SnapshotService::new(engine, clob, temp_config());
        let restored = svc.load("nonexistent-market", 1).await.unwrap();
        assert!(!restored);
    }
}
