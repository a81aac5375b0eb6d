//! Operational HTTP surface: `GET /healthz` and `GET /stats`, exposing
//! `EngineStats` the way the rest of the process
//! would otherwise only see via logs.
//!
//! Grounded on `admin.rs`'s `serve_admin` (axum `Router` +
//! `tokio::net::TcpListener::bind` + `axum::serve`), stripped down from a
//! mutating admin surface to a read-only health surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::engine::order_engine::OrderEngineHandle;
use crate::safety::CircuitBreaker;

#[derive(Clone)]
struct HealthState {
    engine: OrderEngineHandle,
    circuit_breaker: Arc<CircuitBreaker>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct StatsBody {
    generation: u64,
    commands_processed: u64,
    errors_recovered: u64,
    open_orders_count: usize,
    positions_count: usize,
    circuit_breaker_halted: bool,
    consecutive_errors: u32,
    daily_pnl_cents: i64,
}

async fn get_healthz() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn get_stats(State(state): State<HealthState>) -> Json<StatsBody> {
    let stats = state.engine.query_stats().await;
    Json(StatsBody {
        generation: stats.generation,
        commands_processed: stats.commands_processed,
        errors_recovered: stats.errors_recovered,
        open_orders_count: stats.open_orders_count,
        positions_count: stats.positions_count,
        circuit_breaker_halted: state.circuit_breaker.is_halted(),
        consecutive_errors: state.circuit_breaker.consecutive_errors(),
        daily_pnl_cents: state.circuit_breaker.daily_pnl_cents(),
    })
}

/// Serves `/healthz` and `/stats` on `addr` until the process exits.
pub async fn serve(addr: SocketAddr, engine: OrderEngineHandle, circuit_breaker: Arc<CircuitBreaker>) -> anyhow::Result<()> {
    let state = HealthState { engine, circuit_breaker };
    let app = Router::new()
        .route("/healthz", get(get_healthz))
        .route("/stats", get(get_stats))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("health endpoint listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
