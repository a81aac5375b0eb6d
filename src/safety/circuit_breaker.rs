//! Execution circuit breaker: atomics-only hot path,
//! consecutive-error and daily-PnL thresholds, cooldown-based auto-resume,
//! manual halt/resume.
//!
//! Grounded on `bog-core/src/resilience/circuit_breaker.rs`'s atomic
//! `AtomicU8`/`AtomicU64`/`Ordering` idiom, but re-specified to the simpler
//! two-state design actually needed here — there is no Open/HalfOpen
//! three-state machine here, just halted/not plus a CAS-guarded cooldown
//! auto-resume (see DESIGN.md).

use chrono::Local;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

pub struct CircuitBreakerConfig {
    pub max_consecutive_errors: u32,
    /// Daily loss limit in cents; `None` disables the PnL-based trip.
    pub daily_loss_limit_cents: Option<i64>,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            max_consecutive_errors: 5,
            daily_loss_limit_cents: None,
            cooldown: Duration::from_secs(60),
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    halted: AtomicBool,
    consecutive_errors: AtomicU32,
    daily_pnl_cents: AtomicI64,
    /// `YYYYMMDD` as an integer, tracking the last day the PnL counter was
    /// rolled over (local time, per ).
    daily_roll_key: AtomicI64,
    halted_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            halted: AtomicBool::new(false),
            consecutive_errors: AtomicU32::new(0),
            daily_pnl_cents: AtomicI64::new(0),
            daily_roll_key: AtomicI64::new(today_key()),
            halted_at: Mutex::new(None),
        }
    }

    /// Hot-path gate: may trigger a cooldown-based auto-resume via CAS.
    pub fn allow_trading(&self) -> bool {
        if !self.halted.load(Ordering::Acquire) {
            return true;
        }
        if self.config.cooldown.is_zero() {
            return false;
        }
        let elapsed_ok = {
            let guard = self.halted_at.lock();
            match *guard {
                Some(t) => t.elapsed() >= self.config.cooldown,
                None => false,
            }
        };
        if !elapsed_ok {
            return false;
        }
        // Only one caller should win the resume; others observe the result.
        if self
            .halted
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.consecutive_errors.store(0, Ordering::Release);
            *self.halted_at.lock() = None;
        }
        true
    }

    pub fn on_error(&self) {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
        if errors >= self.config.max_consecutive_errors {
            self.trip();
        }
    }

    pub fn on_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
    }

    /// Feeds realized PnL (in cents, negative for losses) into the daily
    /// counter; trips the breaker if the configured daily loss limit is
    /// breached. Resets the counter on a local-time day roll.
    pub fn add_pnl_cents(&self, delta_cents: i64) {
        self.maybe_roll_day();
        let new_total = self.daily_pnl_cents.fetch_add(delta_cents, Ordering::AcqRel) + delta_cents;
        if let Some(limit) = self.config.daily_loss_limit_cents {
            if new_total <= -limit.abs() {
                self.trip();
            }
        }
    }

    fn maybe_roll_day(&self) {
        let today = today_key();
        let last = self.daily_roll_key.load(Ordering::Acquire);
        if last != today
            && self
                .daily_roll_key
                .compare_exchange(last, today, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.daily_pnl_cents.store(0, Ordering::Release);
        }
    }

    fn trip(&self) {
        self.halted.store(true, Ordering::Release);
        *self.halted_at.lock() = Some(Instant::now());
    }

    pub fn halt(&self) {
        self.trip();
    }

    pub fn resume(&self) {
        self.halted.store(false, Ordering::Release);
        self.consecutive_errors.store(0, Ordering::Release);
        *self.halted_at.lock() = None;
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    pub fn daily_pnl_cents(&self) -> i64 {
        self.daily_pnl_cents.load(Ordering::Acquire)
    }
}

fn today_key() -> i64 {
    Local::now().format("%Y%m%d").to_string().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_max_consecutive_errors() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_errors: 3,
            ..Default::default()
        });
        cb.on_error();
        cb.on_error();
        assert!(cb.allow_trading());
        cb.on_error();
        assert!(!cb.allow_trading());
    }

    #[test]
    fn success_resets_consecutive_errors() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_errors: 3,
            ..Default::default()
        });
        cb.on_error();
        cb.on_error();
        cb.on_success();
        assert_eq!(cb.consecutive_errors(), 0);
    }

    #[test]
    fn cooldown_auto_resumes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_errors: 1,
            cooldown: Duration::from_millis(10),
            ..Default::default()
        });
        cb.on_error();
        assert!(!cb.allow_trading());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_trading());
        assert_eq!(cb.consecutive_errors(), 0);
    }

    #[test]
    fn zero_cooldown_never_auto_resumes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_consecutive_errors: 1,
            cooldown: Duration::ZERO,
            ..Default::default()
        });
        cb.on_error();
        assert!(!cb.allow_trading());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cb.allow_trading());
    }

    #[test]
    fn manual_halt_and_resume() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert!(cb.allow_trading());
        cb.halt();
        assert!(cb.is_halted());
        cb.resume();
        assert!(!cb.is_halted());
        assert!(cb.allow_trading());
    }

    #[test]
    fn daily_loss_limit_trips_breaker() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            daily_loss_limit_cents: Some(1000),
            ..Default::default()
        });
        cb.add_pnl_cents(-500);
        assert!(cb.allow_trading());
        cb.add_pnl_cents(-600);
        assert!(!cb.allow_trading());
    }
}
