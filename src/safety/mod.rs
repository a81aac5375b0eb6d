pub mod circuit_breaker;
pub mod debounce;
pub mod dedupe;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use debounce::{Debouncer, SingleFlightThrottle};
pub use dedupe::{DuplicateInFlight, InFlightDeduper};
