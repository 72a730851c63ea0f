//! Resilience pattern implementations

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use backoff::BackoffStrategy;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerCall, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    Fallback, Permit, RaiseOpen, Verdict, circuit_breaker,
};
pub use registry::{
    CircuitBreakerRegistry, get_all_circuit_breaker_stats, get_circuit_breaker_stats,
};
pub use retry::{Retry, RetryAttempt, RetryConfig, RetryPredicate, retry};
pub use timeout::{Deadline, Timeout, TimeoutConfig, timeout};
