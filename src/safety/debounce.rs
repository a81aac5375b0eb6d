//! Small reusable debounce/throttle gate, used by `SnapshotService`'s save
//! trigger and by the reprice path.
//!
//! Grounded on `polymarket/coordinator.rs`'s `place_or_reprice` debounce
//! pattern (compare elapsed time since the last fire against a fixed
//! window).

use std::time::{Duration, Instant};

pub struct Debouncer {
    window: Duration,
    last_fired: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer { window, last_fired: None }
    }

    /// Returns `true` if enough time has passed since the last successful
    /// `should_fire`, and records `now` as the new last-fired time in that
    /// case.
    pub fn should_fire(&mut self) -> bool {
        let now = Instant::now();
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// A throttle that also tracks whether a run is currently in flight, so
/// only one logical operation executes at a time (used by drop-compensation,
/// : "deduped so only one runs at a time").
pub struct SingleFlightThrottle {
    debounce: Debouncer,
    in_flight: bool,
}

impl SingleFlightThrottle {
    pub fn new(window: Duration) -> Self {
        SingleFlightThrottle {
            debounce: Debouncer::new(window),
            in_flight: false,
        }
    }

    /// Attempts to start a run: refused if one is already in flight or the
    /// throttle window hasn't elapsed since the last attempt.
    pub fn try_start(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        if !self.debounce.should_fire() {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_refuses_within_window() {
        let mut d = Debouncer::new(Duration::from_millis(50));
        assert!(d.should_fire());
        assert!(!d.should_fire());
        std::thread::sleep(Duration::from_millis(60));
        assert!(d.should_fire());
    }

    #[test]
    fn single_flight_refuses_concurrent_and_throttled_attempts() {
        let mut t = SingleFlightThrottle::new(Duration::from_millis(50));
        assert!(t.try_start());
        assert!(!t.try_start()); // already in flight
        t.finish();
        assert!(!t.try_start()); // still within throttle window
        std::thread::sleep(Duration::from_millis(60));
        assert!(t.try_start());
    }
}
