//! Process configuration, loaded from the environment the way the reference implementation's
//! `CoordinatorConfig::from_env`/`InventoryConfig::from_env` do — parse or
//! default, no external config-file crate. Grouped into sub-configs the way
//! `bog-core`'s `config::types::Config` composes.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub rest_base_url: String,
    pub ws_market_url: String,
    pub ws_user_url: String,
    pub funder_address: Option<String>,
    pub signer_private_key: Option<String>,
    /// Fee rate in basis points applied to every order. If the configured
    /// value is 0, the IOExecutor substitutes 1000 bps because the venue rejects a literal zero.
    pub fee_rate_bps: u32,
}

impl ExchangeConfig {
    pub fn from_env() -> Self {
        ExchangeConfig {
            rest_base_url: env_string_or("PM_GRID_REST_URL", "https://clob.polymarket.com"),
            ws_market_url: env_string_or("PM_GRID_WS_MARKET_URL", "wss://ws-subscriptions-clob.polymarket.com/ws/market"),
            ws_user_url: env_string_or("PM_GRID_WS_USER_URL", "wss://ws-subscriptions-clob.polymarket.com/ws/user"),
            funder_address: env::var("PM_GRID_FUNDER_ADDRESS").ok(),
            signer_private_key: env::var("PM_GRID_PRIVATE_KEY").ok(),
            fee_rate_bps: env_or("PM_GRID_FEE_RATE_BPS", 0),
        }
    }

    pub fn effective_fee_rate_bps(&self) -> u32 {
        if self.fee_rate_bps == 0 { 1000 } else { self.fee_rate_bps }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub min_order_size: f64,
    pub min_share_size: f64,
    pub max_consecutive_errors: u32,
    pub daily_loss_limit_cents: Option<i64>,
    pub circuit_breaker_cooldown_secs: u64,
    pub risk_off_rate_limit_secs: u64,
    pub risk_off_default_secs: u64,
}

impl RiskConfig {
    pub fn from_env() -> Self {
        RiskConfig {
            min_order_size: env_or("PM_GRID_MIN_ORDER_SIZE", 1.0),
            min_share_size: env_or("PM_GRID_MIN_SHARE_SIZE", 5.0),
            max_consecutive_errors: env_or("PM_GRID_MAX_CONSECUTIVE_ERRORS", 5),
            daily_loss_limit_cents: env::var("PM_GRID_DAILY_LOSS_LIMIT_CENTS").ok().and_then(|v| v.parse().ok()),
            circuit_breaker_cooldown_secs: env_or("PM_GRID_CB_COOLDOWN_SECS", 60),
            risk_off_rate_limit_secs: env_or("PM_GRID_RISK_OFF_RATE_LIMIT_SECS", 5),
            risk_off_default_secs: env_or("PM_GRID_RISK_OFF_DEFAULT_SECS", 2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_with_orders_secs: u64,
    pub interval_without_orders_secs: u64,
    /// `priceCents` band for entry orders, e.g. `[60, 90]`.
    pub entry_price_band_cents: (i32, i32),
    /// `priceCents` band for hedge orders, e.g. `[1, 40]`.
    pub hedge_price_band_cents: (i32, i32),
    pub stale_pending_age_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        SyncConfig {
            interval_with_orders_secs: env_or("PM_GRID_SYNC_INTERVAL_WITH_ORDERS_SECS", 3),
            interval_without_orders_secs: env_or("PM_GRID_SYNC_INTERVAL_WITHOUT_ORDERS_SECS", 30),
            entry_price_band_cents: (60, 90),
            hedge_price_band_cents: (1, 40),
            stale_pending_age_secs: env_or("PM_GRID_STALE_PENDING_AGE_SECS", 20),
        }
    }

    pub fn interval_with_orders(&self) -> Duration {
        Duration::from_secs(self.interval_with_orders_secs)
    }

    pub fn interval_without_orders(&self) -> Duration {
        Duration::from_secs(self.interval_without_orders_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub storage_root: String,
    pub debounce_secs: u64,
    pub persistence_id: String,
}

impl SnapshotConfig {
    pub fn from_env() -> Self {
        SnapshotConfig {
            storage_root: env_string_or("PM_GRID_SNAPSHOT_DIR", "./data/snapshots"),
            debounce_secs: env_or("PM_GRID_SNAPSHOT_DEBOUNCE_SECS", 2),
            persistence_id: env_string_or("PM_GRID_PERSISTENCE_ID", "trading"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub risk: RiskConfig,
    pub sync: SyncConfig,
    pub snapshot: SnapshotConfig,
    pub dry_run: bool,
    pub command_channel_capacity: usize,
    pub health_addr: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        AppConfig {
            exchange: ExchangeConfig::from_env(),
            risk: RiskConfig::from_env(),
            sync: SyncConfig::from_env(),
            snapshot: SnapshotConfig::from_env(),
            dry_run: env_or("PM_GRID_DRY_RUN", true),
            command_channel_capacity: env_or("PM_GRID_CMD_CHANNEL_CAPACITY", 1000),
            health_addr: env_string_or("PM_GRID_HEALTH_ADDR", "127.0.0.1:8088"),
            log_level: env_string_or("PM_GRID_LOG_LEVEL", "info"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rate_substitutes_default_when_zero() {
        let mut cfg = ExchangeConfig::from_env();
        cfg.fee_rate_bps = 0;
        assert_eq!(cfg.effective_fee_rate_bps(), 1000);
        cfg.fee_rate_bps = 250;
        assert_eq!(cfg.effective_fee_rate_bps(), 250);
    }
}
