//! Trading core for an automated market-making / grid-hedging bot against a
//! prediction-market central limit order book.
//!
//! The hard part lives here: a single-writer `OrderEngine` actor that
//! linearises every mutation to balance/orders/positions, the IO executor
//! that turns placement/cancellation into non-blocking exchange calls, the
//! reconciliation loop that repairs drift against the REST `open orders`
//! view, the cycle-generation mechanism isolating successive markets, the
//! snapshot/restore layer, and the execution-layer safety rails (in-flight
//! dedup, circuit breaker, risk-off cooldown).
//!
//! The CLOB REST client, the market/user WebSocket streams, the secret
//! store and the on-chain USDC balance probe are external collaborators;
//! this crate only defines the typed ports they're written against
//! (`ports`), not concrete adapters.

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod health;
pub mod market_quality;
pub mod ports;
pub mod safety;
pub mod snapshot;
pub mod sync;
pub mod trading_service;
