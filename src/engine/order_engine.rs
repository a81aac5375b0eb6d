//! The OrderEngine single-writer actor.
//!
//! Grounded on `polymarket/coordinator.rs`'s `run()` (`tokio::select!` loop
//! over a bounded mpsc, non-blocking reply discipline) and
//! `polymarket/executor.rs`'s actor-with-open-orders-map shape.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::Future;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{
    dry_run_trade_id, position_id, Market, Order, OrderId, OrderStatus, Position, PositionId,
    PositionStatus, Price, Side, TokenType, Trade, TradeId,
};
use crate::errors::EngineError;

use super::command::{Command, EngineStats, Gen, QueryKind, Reply, StateSnapshot};
use super::io_executor::IoExecutorPort;
use super::merge::merge_order_in_place;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

type IoTask = Pin<Box<dyn Future<Output = ()> + Send>>;
type HandlerFn = Arc<dyn Fn(&Order) + Send + Sync>;

pub struct OrderEngineConfig {
    pub channel_capacity: usize,
    pub min_order_size: f64,
    pub dry_run: bool,
}

impl Default for OrderEngineConfig {
    fn default() -> Self {
        OrderEngineConfig {
            channel_capacity: 1000,
            min_order_size: 1.0,
            dry_run: true,
        }
    }
}

struct EngineState {
    balance: f64,
    open_orders: HashMap<OrderId, Order>,
    order_store: HashMap<OrderId, Order>,
    positions: HashMap<PositionId, Position>,
    pending_trades: Vec<Trade>,
    seen_trades: HashSet<TradeId>,
    generation: Gen,
    handlers: Vec<HandlerFn>,
    pending_place_replies: HashMap<OrderId, Reply<Result<Order, EngineError>>>,
    current_market: Option<Market>,
    min_order_size: f64,
    dry_run: bool,
    stats: EngineStats,
}

impl EngineState {
    fn new(min_order_size: f64, dry_run: bool) -> Self {
        EngineState {
            balance: 0.0,
            open_orders: HashMap::new(),
            order_store: HashMap::new(),
            positions: HashMap::new(),
            pending_trades: Vec::new(),
            seen_trades: HashSet::new(),
            generation: 1,
            handlers: Vec::new(),
            pending_place_replies: HashMap::new(),
            current_market: None,
            min_order_size,
            dry_run,
            stats: EngineStats::default(),
        }
    }

    fn notify(&self, order: &Order) {
        for h in &self.handlers {
            h(order);
        }
    }

    fn infer_token_type(&self, asset_id: &str) -> TokenType {
        match &self.current_market {
            Some(m) if m.yes_asset_id == asset_id => TokenType::Up,
            Some(m) if m.no_asset_id == asset_id => TokenType::Down,
            _ => TokenType::Up,
        }
    }
}

/// Handle to a spawned engine; every public method sends a `Command` over
/// the bounded mpsc and awaits the reply, mirroring its contract
/// that external observers mutate nothing and only query via commands.
#[derive(Clone)]
pub struct OrderEngineHandle {
    tx: mpsc::Sender<Command>,
}

impl OrderEngineHandle {
    pub fn sender(&self) -> mpsc::Sender<Command> {
        self.tx.clone()
    }

    pub async fn place_order(&self, gen: Gen, order: Order) -> Result<Order, EngineError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::PlaceOrder { gen, order, reply }).await;
        rx.await.unwrap_or(Err(EngineError::InvalidOrder))
    }

    pub async fn cancel_order(&self, gen: Gen, order_id: OrderId) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CancelOrder { gen, order_id, reply }).await;
        rx.await.unwrap_or(Err(EngineError::InvalidOrder))
    }

    pub async fn process_trade(&self, gen: Gen, trade: Trade) {
        let _ = self.tx.send(Command::ProcessTrade { gen, trade }).await;
    }

    pub async fn update_balance(&self, balance: f64, currency: Option<String>) {
        let _ = self.tx.send(Command::UpdateBalance { balance, currency }).await;
    }

    pub async fn create_position(&self, gen: Gen, position: Position) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CreatePosition { gen, position, reply }).await;
        rx.await.unwrap_or(Err(EngineError::InvalidOrder))
    }

    pub async fn update_position(&self, gen: Gen, position: Position) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::UpdatePosition { gen, position, reply }).await;
        rx.await.unwrap_or(Err(EngineError::InvalidOrder))
    }

    pub async fn close_position(
        &self,
        gen: Gen,
        position_id: PositionId,
        exit_price: Price,
        exit_time: i64,
    ) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::ClosePosition { gen, position_id, exit_price, exit_time, reply })
            .await;
        rx.await.unwrap_or(Err(EngineError::InvalidOrder))
    }

    pub async fn query_state(
        &self,
        query: QueryKind,
        order_id: Option<OrderId>,
        position_id: Option<PositionId>,
    ) -> StateSnapshot {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::QueryState { query, order_id, position_id, reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn query_stats(&self) -> EngineStats {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::QueryStats { reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn reset_cycle(&self, new_market_slug: String, reason: String, new_generation: Gen) -> Gen {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(Command::ResetCycle { new_market_slug, reason, new_generation, reply })
            .await;
        rx.await.unwrap_or(new_generation)
    }

    pub fn register_handler(&self, handler: HandlerFn) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Command::RegisterHandler { handler }).await;
        });
    }
}

pub fn spawn(config: OrderEngineConfig, io_executor: Arc<dyn IoExecutorPort>) -> OrderEngineHandle {
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let handle = OrderEngineHandle { tx: tx.clone() };
    tokio::spawn(run(rx, tx, io_executor, config));
    handle
}

async fn run(
    mut rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    io_executor: Arc<dyn IoExecutorPort>,
    config: OrderEngineConfig,
) {
    let mut state = EngineState::new(config.min_order_size, config.dry_run);
    tracing::info!("order engine started (dry_run={})", state.dry_run);

    while let Some(cmd) = rx.recv().await {
        state.stats.commands_processed += 1;
        let io_executor = io_executor.clone();
        let tx = tx.clone();
        // Every command handler runs under a deferred recover: a panic
        // inside the synchronous mutation is caught and logged, but the
        // engine loop itself never terminates.
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| handle_command(&mut state, cmd, io_executor, tx)));
        match result {
            Ok(Some(task)) => {
                tokio::spawn(task);
            }
            Ok(None) => {}
            Err(_) => {
                state.stats.errors_recovered += 1;
                tracing::error!("order engine command handler panicked; recovered, continuing");
            }
        }
    }
    tracing::info!("order engine command channel closed; exiting");
}

fn handle_command(
    state: &mut EngineState,
    cmd: Command,
    io_executor: Arc<dyn IoExecutorPort>,
    tx: mpsc::Sender<Command>,
) -> Option<IoTask> {
    match cmd {
        Command::PlaceOrder { gen, order, reply } => handle_place_order(state, gen, order, reply, io_executor, tx),
        Command::CancelOrder { gen, order_id, reply } => {
            handle_cancel_order(state, gen, order_id, reply, io_executor, tx)
        }
        Command::UpdateOrder { gen, order, error, original_order_id } => {
            handle_update_order(state, gen, order, error, original_order_id);
            None
        }
        Command::ProcessTrade { gen, trade } => {
            if gen_ok(state, gen) {
                process_trade_internal(state, trade);
            }
            None
        }
        Command::UpdateBalance { balance, .. } => {
            state.balance = balance;
            None
        }
        Command::CreatePosition { gen, position, reply } => {
            let result = if !gen_ok(state, gen) {
                Err(EngineError::StaleGeneration { got: gen, want: state.generation })
            } else if state.positions.contains_key(&position.id) {
                Err(EngineError::PositionAlreadyExists(position.id.clone()))
            } else {
                state.positions.insert(position.id.clone(), position);
                Ok(())
            };
            let _ = reply.send(result);
            None
        }
        Command::UpdatePosition { gen, position, reply } => {
            let result = if !gen_ok(state, gen) {
                Err(EngineError::StaleGeneration { got: gen, want: state.generation })
            } else if !state.positions.contains_key(&position.id) {
                Err(EngineError::PositionNotFound(position.id.clone()))
            } else {
                state.positions.insert(position.id.clone(), position);
                Ok(())
            };
            let _ = reply.send(result);
            None
        }
        Command::ClosePosition { gen, position_id, exit_price, exit_time, reply } => {
            let result = if !gen_ok(state, gen) {
                Err(EngineError::StaleGeneration { got: gen, want: state.generation })
            } else {
                match state.positions.get_mut(&position_id) {
                    None => Err(EngineError::PositionNotFound(position_id.clone())),
                    Some(p) if p.status == PositionStatus::Closed => {
                        Err(EngineError::PositionAlreadyClosed(position_id.clone()))
                    }
                    Some(p) => {
                        p.close(exit_price, exit_time, None);
                        Ok(())
                    }
                }
            };
            let _ = reply.send(result);
            None
        }
        Command::QueryState { query, order_id, position_id, reply } => {
            let snapshot = build_snapshot(state, query, order_id, position_id);
            let _ = reply.send(snapshot);
            None
        }
        Command::QueryStats { reply } => {
            let mut stats = state.stats.clone();
            stats.generation = state.generation;
            stats.open_orders_count = state.open_orders.len();
            stats.positions_count = state.positions.len();
            let _ = reply.send(stats);
            None
        }
        Command::ResetCycle { new_market_slug: _, reason, new_generation, reply } => {
            let next = state.generation.max(new_generation.max(state.generation + 1));
            tracing::info!("resetting cycle: gen {} -> {} ({})", state.generation, next, reason);
            state.generation = next;
            state.open_orders.clear();
            state.order_store.clear();
            state.positions.clear();
            state.pending_trades.clear();
            state.seen_trades.clear();
            state.pending_place_replies.clear();
            let _ = reply.send(state.generation);
            None
        }
        Command::RegisterHandler { handler } => {
            state.handlers.push(handler);
            None
        }
    }
}

fn gen_ok(state: &EngineState, gen: Gen) -> bool {
    if gen != state.generation {
        tracing::warn!("dropping command with stale generation {} (current {})", gen, state.generation);
        false
    } else {
        true
    }
}

fn handle_place_order(
    state: &mut EngineState,
    gen: Gen,
    mut order: Order,
    reply: Reply<Result<Order, EngineError>>,
    io_executor: Arc<dyn IoExecutorPort>,
    tx: mpsc::Sender<Command>,
) -> Option<IoTask> {
    if !gen_ok(state, gen) {
        // commands with mismatched Gen are silently dropped; drop `reply`
        // too so the caller's await resolves to a RecvError rather than
        // hanging.
        return None;
    }

    if order.market_slug.is_empty() || order.asset_id.is_empty() {
        let _ = reply.send(Err(EngineError::InvalidOrder));
        return None;
    }
    if order.size <= 0.0 {
        let _ = reply.send(Err(EngineError::InvalidSize));
        return None;
    }
    if order.price.0 <= 0 {
        let _ = reply.send(Err(EngineError::InvalidPrice));
        return None;
    }
    let notional = order.notional();
    if notional < state.min_order_size {
        let _ = reply.send(Err(EngineError::BelowMinOrderSize { notional, min_order_size: state.min_order_size }));
        return None;
    }
    if !state.dry_run && state.balance < notional {
        let _ = reply.send(Err(EngineError::InsufficientBalance { balance: state.balance, required: notional }));
        return None;
    }
    if !state.dry_run {
        state.balance -= notional;
    }

    if order.order_id.is_empty() {
        order.order_id = crate::domain::order::local_order_id();
    }
    order.status = OrderStatus::Pending;
    order.created_at = now_ms();

    let local_id = order.order_id.clone();
    state.open_orders.insert(local_id.clone(), order.clone());
    state.order_store.insert(local_id.clone(), order.clone());
    state.pending_place_replies.insert(local_id.clone(), reply);

    let fut = async move {
        let result = io_executor.place_order(order).await;
        let cmd = match result {
            Ok(confirmed) => Command::UpdateOrder {
                gen,
                order: confirmed,
                error: None,
                original_order_id: Some(local_id),
            },
            Err(e) => {
                let mut failed_marker = Order::new(String::new(), String::new(), Side::Buy, Price::ZERO, 0.0);
                failed_marker.order_id = local_id.clone();
                Command::UpdateOrder {
                    gen,
                    order: failed_marker,
                    error: Some(e.to_string()),
                    original_order_id: Some(local_id),
                }
            }
        };
        let _ = tx.send(cmd).await;
    };
    Some(Box::pin(fut))
}

fn handle_cancel_order(
    state: &mut EngineState,
    gen: Gen,
    order_id: OrderId,
    reply: Reply<Result<(), EngineError>>,
    io_executor: Arc<dyn IoExecutorPort>,
    tx: mpsc::Sender<Command>,
) -> Option<IoTask> {
    if !gen_ok(state, gen) {
        return None;
    }

    if !state.open_orders.contains_key(&order_id) {
        match state.order_store.get(&order_id) {
            Some(o) if o.status == OrderStatus::Filled => {
                let _ = reply.send(Err(EngineError::AlreadyTerminal(order_id)));
            }
            Some(o) if o.status == OrderStatus::Canceled => {
                let _ = reply.send(Ok(()));
            }
            _ => {
                let _ = reply.send(Err(EngineError::OrderNotFound(order_id)));
            }
        }
        return None;
    }

    if let Some(o) = state.open_orders.get_mut(&order_id) {
        o.status = OrderStatus::Canceling;
        if let Some(stored) = state.order_store.get_mut(&order_id) {
            stored.status = OrderStatus::Canceling;
        }
        state.notify(o);
    }
    let _ = reply.send(Ok(()));

    let fut = async move {
        let result = io_executor.cancel_order(order_id.clone()).await;
        let mut marker = Order::new(String::new(), String::new(), Side::Buy, Price::ZERO, 0.0);
        marker.order_id = order_id.clone();
        marker.status = OrderStatus::Canceling;
        let cmd = match result {
            Ok(()) => Command::UpdateOrder { gen, order: marker, error: None, original_order_id: None },
            Err(e) => Command::UpdateOrder { gen, order: marker, error: Some(e.to_string()), original_order_id: None },
        };
        let _ = tx.send(cmd).await;
    };
    Some(Box::pin(fut))
}

fn handle_update_order(state: &mut EngineState, gen: Gen, order: Order, error: Option<String>, original_order_id: Option<OrderId>) {
    if !gen_ok(state, gen) {
        return;
    }

    let lookup_id = original_order_id.clone().unwrap_or_else(|| order.order_id.clone());

    if let Some(err_text) = error {
        if order.status == OrderStatus::Canceling {
            let is_non_cancelable = crate::errors::IoExecutorError::is_non_cancelable_class(&err_text);
            if let Some(existing) = state.order_store.get_mut(&order.order_id) {
                if is_non_cancelable {
                    existing.status = OrderStatus::Canceled;
                    existing.canceled_at = Some(now_ms());
                    state.open_orders.remove(&order.order_id);
                } else {
                    existing.status = OrderStatus::Open;
                    state.open_orders.insert(order.order_id.clone(), existing.clone());
                }
                state.notify(existing);
            }
            return;
        }

        // IO failure on placement: fail, refund reserved funds.
        if let Some(existing) = state.order_store.get_mut(&lookup_id) {
            existing.status = OrderStatus::Failed;
            existing.last_error = Some(err_text);
            state.open_orders.remove(&lookup_id);
            if !state.dry_run {
                state.balance += existing.notional();
            }
            let finalized = existing.clone();
            state.notify(&finalized);
            if let Some(r) = state.pending_place_replies.remove(&lookup_id) {
                let _ = r.send(Ok(finalized));
            }
        }
        return;
    }

    // Success path. Cancel-completion marker (empty market_slug sentinel).
    if order.market_slug.is_empty() && order.status == OrderStatus::Canceling {
        if let Some(existing) = state.order_store.get_mut(&order.order_id) {
            existing.status = OrderStatus::Canceled;
            existing.canceled_at = Some(now_ms());
            state.open_orders.remove(&order.order_id);
            state.notify(existing);
        }
        return;
    }

    let is_rekey = original_order_id.as_deref().map(|o| o != order.order_id).unwrap_or(false);

    if is_rekey {
        let local_id = original_order_id.clone().unwrap();
        if let Some(mut existing) = state.order_store.remove(&local_id) {
            state.open_orders.remove(&local_id);
            super::merge::rekey_and_merge(&mut existing, &order);
            let new_id = existing.order_id.clone();
            state.order_store.insert(new_id.clone(), existing.clone());
            if existing.is_open() {
                state.open_orders.insert(new_id.clone(), existing.clone());
            }
            state.notify(&existing);
            if let Some(r) = state.pending_place_replies.remove(&local_id) {
                let _ = r.send(Ok(existing));
            }
            drain_pending_trades(state);
            return;
        }
    }

    if let Some(existing) = state.order_store.get_mut(&order.order_id) {
        merge_order_in_place(existing, &order);
        if existing.is_open() {
            state.open_orders.insert(order.order_id.clone(), existing.clone());
        } else {
            state.open_orders.remove(&order.order_id);
        }
        let finalized = existing.clone();
        state.notify(&finalized);
        if let Some(r) = state.pending_place_replies.remove(&order.order_id) {
            let _ = r.send(Ok(finalized.clone()));
        }

        // Dry-run fill synthesis.
        if state.dry_run && finalized.status == OrderStatus::Filled {
            let trade = Trade {
                id: dry_run_trade_id(&finalized.order_id),
                order_id: finalized.order_id.clone(),
                asset_id: finalized.asset_id.clone(),
                side: finalized.side,
                price: finalized.filled_price.unwrap_or(finalized.price),
                size: finalized.size,
                token_type: finalized.token_type,
                time: now_ms(),
                market: Some(finalized.market_slug.clone()),
                fee: None,
            };
            if !state.seen_trades.contains(&trade.id) {
                process_trade_internal(state, trade);
            }
        }
    } else {
        // Order reached us before its PlaceOrder insert (shouldn't happen,
        // but keep it rather than drop silently).
        state.order_store.insert(order.order_id.clone(), order.clone());
        if order.is_open() {
            state.open_orders.insert(order.order_id.clone(), order.clone());
        }
    }
}

fn process_trade_internal(state: &mut EngineState, trade: Trade) {
    if state.seen_trades.contains(&trade.id) {
        return;
    }
    state.seen_trades.insert(trade.id.clone());

    match resolve_trade_order_id(state, &trade) {
        Some(order_id) => {
            apply_fill(state, &order_id, &trade);
            drain_pending_trades(state);
        }
        None => state.pending_trades.push(trade),
    }
}

fn resolve_trade_order_id(state: &mut EngineState, trade: &Trade) -> Option<OrderId> {
    if state.order_store.contains_key(&trade.order_id) {
        return Some(trade.order_id.clone());
    }

    let candidates: Vec<OrderId> = state
        .order_store
        .values()
        .filter(|o| o.asset_id == trade.asset_id && !o.status.is_final())
        .map(|o| o.order_id.clone())
        .collect();

    if candidates.len() == 1 {
        let local_id = candidates[0].clone();
        if local_id != trade.order_id {
            if let Some(mut existing) = state.order_store.remove(&local_id) {
                state.open_orders.remove(&local_id);
                existing.order_id = trade.order_id.clone();
                state.order_store.insert(trade.order_id.clone(), existing.clone());
                if existing.is_open() {
                    state.open_orders.insert(trade.order_id.clone(), existing);
                }
            }
        }
        return Some(trade.order_id.clone());
    }
    if candidates.len() > 1 {
        return None;
    }

    // Synthesize a minimal order so the position/PnL path still executes.
    let synth_id = format!("ws_trade:{}", trade.id);
    let mut synth = Order::new(
        trade.market.clone().unwrap_or_default(),
        trade.asset_id.clone(),
        trade.side,
        trade.price,
        trade.size,
    );
    synth.order_id = synth_id.clone();
    synth.token_type = trade.token_type;
    state.order_store.insert(synth_id.clone(), synth);
    Some(synth_id)
}

fn apply_fill(state: &mut EngineState, order_id: &str, trade: &Trade) {
    let (side, asset_id, market_slug, token_type, order_id_owned) = {
        let order = match state.order_store.get_mut(order_id) {
            Some(o) => o,
            None => return,
        };

        let old_filled = order.filled_size;
        let new_filled = old_filled + trade.size;
        order.filled_price = Some(match order.filled_price {
            Some(old_price) if old_filled > 0.0 => {
                Price::from_decimal(
                    (old_price.as_decimal() * old_filled + trade.price.as_decimal() * trade.size) / new_filled,
                )
            }
            _ => trade.price,
        });
        order.filled_size = new_filled;

        if order.filled_size >= order.size && order.size > 0.0 {
            order.status = OrderStatus::Filled;
            order.filled_at = Some(trade.time);
        } else if order.filled_size > 0.0 && !order.status.is_final() {
            order.status = OrderStatus::Partial;
        }

        if !order.is_open() {
            state.open_orders.remove(order_id);
        } else if let Some(o) = state.open_orders.get_mut(order_id) {
            *o = order.clone();
        }

        (order.side, order.asset_id.clone(), order.market_slug.clone(), order.token_type, order.order_id.clone())
    };

    if let Some(o) = state.order_store.get(order_id) {
        state.notify(o);
    }

    let token_type = token_type.or(trade.token_type).unwrap_or_else(|| state.infer_token_type(&asset_id));
    let pid = position_id(&market_slug, &asset_id, token_type);
    let entry = state.positions.entry(pid.clone()).or_insert_with(|| {
        Position::new(market_slug.clone(), asset_id.clone(), token_type, Some(order_id_owned.clone()), trade.price, trade.time)
    });
    entry.apply_fill(side, trade.size, trade.price, Some(order_id_owned), trade.time);
}

fn drain_pending_trades(state: &mut EngineState) {
    if state.pending_trades.is_empty() {
        return;
    }
    let pending = std::mem::take(&mut state.pending_trades);
    for trade in pending {
        state.seen_trades.remove(&trade.id);
        process_trade_internal(state, trade);
    }
}

fn build_snapshot(state: &EngineState, query: QueryKind, order_id: Option<OrderId>, position_id: Option<PositionId>) -> StateSnapshot {
    let mut snap = StateSnapshot::default();
    match query {
        QueryKind::Balance => snap.balance = state.balance,
        QueryKind::AllOrders => snap.orders = state.order_store.values().cloned().collect(),
        QueryKind::OpenOrders => snap.open_orders = state.open_orders.values().cloned().collect(),
        QueryKind::AllPositions => snap.positions = state.positions.values().cloned().collect(),
        QueryKind::OpenPositions => {
            snap.open_positions = state.positions.values().filter(|p| p.status == PositionStatus::Open).cloned().collect()
        }
        QueryKind::Order => {
            snap.order = order_id.and_then(|id| state.order_store.get(&id).cloned());
            if snap.order.is_none() {
                snap.error = Some("order not found".to_string());
            }
        }
        QueryKind::Position => {
            snap.position = position_id.and_then(|id| state.positions.get(&id).cloned());
            if snap.position.is_none() {
                snap.error = Some("position not found".to_string());
            }
        }
    }
    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// A scripted `IoExecutorPort`: placements echo back a server id and
    /// `Open` status (or a canned error); cancels always succeed.
    struct ScriptedIo {
        server_id: StdMutex<Option<String>>,
        place_error: Option<String>,
    }

    #[async_trait::async_trait]
    impl IoExecutorPort for ScriptedIo {
        async fn place_order(&self, mut order: Order) -> Result<Order, crate::errors::IoExecutorError> {
            if let Some(err) = &self.place_error {
                return Err(crate::errors::IoExecutorError::Network(err.clone()));
            }
            if let Some(sid) = self.server_id.lock().unwrap().take() {
                order.order_id = sid;
            }
            order.status = OrderStatus::Open;
            Ok(order)
        }

        async fn cancel_order(&self, _order_id: String) -> Result<(), crate::errors::IoExecutorError> {
            Ok(())
        }
    }

    async fn spawn_with(io: ScriptedIo, balance: f64) -> OrderEngineHandle {
        let handle = spawn(
            OrderEngineConfig { channel_capacity: 100, min_order_size: 1.0, dry_run: false },
            Arc::new(io),
        );
        handle.update_balance(balance, Some("USDC".to_string())).await;
        handle
    }

    /// Scenario 1 from spec.md §8: place, balance reserved, server fill
    /// arrives via a trade, position created with the expected avg price.
    #[tokio::test]
    async fn basic_placement_and_fill_updates_balance_and_position() {
        let io = ScriptedIo { server_id: StdMutex::new(Some("S1".to_string())), place_error: None };
        let handle = spawn_with(io, 100.0).await;

        let mut order = Order::new("x-15m-1000".to_string(), "asset-up".to_string(), Side::Buy, Price::from_cents(50), 10.0);
        order.token_type = Some(TokenType::Up);
        let placed = handle.place_order(1, order).await.expect("place succeeds");
        assert_eq!(placed.order_id, "S1");
        assert_eq!(placed.status, OrderStatus::Open);

        let balance_after_reserve = handle.query_state(QueryKind::Balance, None, None).await.balance;
        assert_eq!(balance_after_reserve, 95.0);

        handle
            .process_trade(
                1,
                Trade {
                    id: "t1".to_string(),
                    order_id: "S1".to_string(),
                    asset_id: "asset-up".to_string(),
                    side: Side::Buy,
                    price: Price::from_cents(50),
                    size: 10.0,
                    token_type: Some(TokenType::Up),
                    time: 2000,
                    market: Some("x-15m-1000".to_string()),
                    fee: None,
                },
            )
            .await;

        let snap = handle.query_state(QueryKind::AllOrders, Some("S1".to_string()), None).await;
        let order = snap.orders.iter().find(|o| o.order_id == "S1").expect("order present");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_size, 10.0);

        let pid = position_id("x-15m-1000", "asset-up", TokenType::Up);
        let psnap = handle.query_state(QueryKind::Position, None, Some(pid)).await;
        let position = psnap.position.expect("position created");
        assert_eq!(position.size, 10.0);
        assert_eq!(position.avg_price.0, 5000);
        assert_eq!(position.cost_basis, 5.0);
    }

    /// Scenario 2: two partial fills at different prices produce a
    /// size-weighted average filled price to pip precision.
    #[tokio::test]
    async fn partial_fills_weighted_average_to_pip_precision() {
        let io = ScriptedIo { server_id: StdMutex::new(Some("S1".to_string())), place_error: None };
        let handle = spawn_with(io, 100.0).await;

        let mut order = Order::new("x-15m-1000".to_string(), "asset-up".to_string(), Side::Buy, Price::from_cents(50), 10.0);
        order.token_type = Some(TokenType::Up);
        handle.place_order(1, order).await.unwrap();

        for (size, price_cents) in [(4.0, 50), (6.0, 52)] {
            handle
                .process_trade(
                    1,
                    Trade {
                        id: format!("t-{price_cents}"),
                        order_id: "S1".to_string(),
                        asset_id: "asset-up".to_string(),
                        side: Side::Buy,
                        price: Price::from_cents(price_cents),
                        size,
                        token_type: Some(TokenType::Up),
                        time: 2000,
                        market: Some("x-15m-1000".to_string()),
                        fee: None,
                    },
                )
                .await;
        }

        let snap = handle.query_state(QueryKind::Order, Some("S1".to_string()), None).await;
        let order = snap.order.expect("order present");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_size, 10.0);
        // (4*0.50 + 6*0.52) / 10 = 0.512 -> 5120 pips
        assert_eq!(order.filled_price.unwrap().0, 5120);
    }

    /// Scenario 3: cancel raced against an in-flight placement never leaves
    /// the order lingering open once the server id is known.
    #[tokio::test]
    async fn cancel_race_resolves_once_server_id_is_known() {
        let io = ScriptedIo { server_id: StdMutex::new(Some("S1".to_string())), place_error: None };
        let handle = spawn_with(io, 100.0).await;

        let mut order = Order::new("x-15m-1000".to_string(), "asset-up".to_string(), Side::Buy, Price::from_cents(50), 10.0);
        order.token_type = Some(TokenType::Up);
        let placed = handle.place_order(1, order).await.unwrap();
        assert_eq!(placed.order_id, "S1");

        // Cancel by the now-known server id; the queued cancel-complete
        // event (simulated directly here since ScriptedIo::cancel_order
        // always succeeds) must bring the order to a non-open terminal
        // state and it must never resurface in open_orders.
        handle.cancel_order(1, "S1".to_string()).await.unwrap();
        // Allow the spawned cancel-IO task to post its completion command.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let open = handle.query_state(QueryKind::OpenOrders, None, None).await.open_orders;
        assert!(open.iter().all(|o| o.order_id != "S1"), "canceled order must not linger open");

        // A second cancel on the same, now-canceled order is idempotent.
        assert!(handle.cancel_order(1, "S1".to_string()).await.is_ok());
    }

    /// §4.1.2 server-ID rekey: strategy references by the local id still
    /// resolve after the server id replaces it, and the local-id entry is
    /// gone from both maps.
    #[tokio::test]
    async fn server_id_rekey_drops_local_id_entry() {
        let io = ScriptedIo { server_id: StdMutex::new(Some("S-REKEY".to_string())), place_error: None };
        let handle = spawn_with(io, 100.0).await;

        let mut order = Order::new("x-15m-1000".to_string(), "asset-up".to_string(), Side::Buy, Price::from_cents(50), 10.0);
        order.token_type = Some(TokenType::Up);
        let local_id = order.order_id.clone();
        let placed = handle.place_order(1, order).await.unwrap();
        assert_eq!(placed.order_id, "S-REKEY");

        let all = handle.query_state(QueryKind::AllOrders, None, None).await.orders;
        assert!(all.iter().all(|o| o.order_id != local_id), "local-id entry must be gone after rekey");
        assert!(all.iter().any(|o| o.order_id == "S-REKEY"));
    }

    /// §8 cycle-switch isolation: after `ResetCycle`, a stale-gen command
    /// referencing the old order produces no state change.
    #[tokio::test]
    async fn reset_cycle_drops_stale_generation_commands() {
        let io = ScriptedIo { server_id: StdMutex::new(Some("OA".to_string())), place_error: None };
        let handle = spawn_with(io, 100.0).await;

        let mut order = Order::new("a-..-1000".to_string(), "asset-up".to_string(), Side::Buy, Price::from_cents(50), 10.0);
        order.token_type = Some(TokenType::Up);
        handle.place_order(1, order).await.unwrap();

        let new_gen = handle.reset_cycle("b-..-2000".to_string(), "SetCurrentMarket".to_string(), 2000).await;
        assert!(new_gen >= 2000);

        let snap = handle.query_state(QueryKind::AllOrders, None, None).await;
        assert!(snap.orders.is_empty(), "cycle switch must clear orderStore");

        // A stale-gen update for the old order must not resurrect it.
        handle.process_trade(1, Trade {
            id: "stale-trade".to_string(),
            order_id: "OA".to_string(),
            asset_id: "asset-up".to_string(),
            side: Side::Buy,
            price: Price::from_cents(50),
            size: 1.0,
            token_type: Some(TokenType::Up),
            time: 3000,
            market: Some("a-..-1000".to_string()),
            fee: None,
        }).await;

        let snap_after = handle.query_state(QueryKind::AllOrders, None, None).await;
        assert!(snap_after.orders.is_empty(), "stale-gen trade must be dropped, not resurrect state");
    }

    /// A reconcile-synthesised delta-trade applied twice only updates
    /// `FilledSize` once (testable property in spec.md §8).
    #[tokio::test]
    async fn duplicate_trade_id_applied_once() {
        let io = ScriptedIo { server_id: StdMutex::new(Some("S1".to_string())), place_error: None };
        let handle = spawn_with(io, 100.0).await;

        let mut order = Order::new("x-15m-1000".to_string(), "asset-up".to_string(), Side::Buy, Price::from_cents(50), 10.0);
        order.token_type = Some(TokenType::Up);
        handle.place_order(1, order).await.unwrap();

        let trade = Trade {
            id: "reconcile:S1:5".to_string(),
            order_id: "S1".to_string(),
            asset_id: "asset-up".to_string(),
            side: Side::Buy,
            price: Price::from_cents(50),
            size: 5.0,
            token_type: Some(TokenType::Up),
            time: 2000,
            market: Some("x-15m-1000".to_string()),
            fee: None,
        };
        handle.process_trade(1, trade.clone()).await;
        handle.process_trade(1, trade).await;

        let snap = handle.query_state(QueryKind::Order, Some("S1".to_string()), None).await;
        assert_eq!(snap.order.unwrap().filled_size, 5.0);
    }
}
