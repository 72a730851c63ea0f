//! Core types and traits for the resilience library
//!
//! Error types, the error taxonomy, configuration plumbing, and the
//! operation traits every wrapper is built on.

pub mod classify;
pub mod config;
pub mod error;
pub mod operation;

pub use classify::{Classify, DEFAULT_TRANSIENT_KINDS, ErrorKind};
pub use config::{ResilienceConfig, ResilienceProfile};
pub use error::{CircuitBreakerOpenError, ConfigError, ConfigResult, TimeoutError};
pub use operation::{AsyncOperation, Operation, OperationExt};

/// Core constants
pub mod constants {
    use std::time::Duration;

    /// Default timeout duration
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default retry attempts, including the first call
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

    /// Default first backoff delay
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

    /// Default backoff cap
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Default circuit breaker threshold
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    /// Default sliding window for counting breaker failures
    pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

    /// Default time a breaker stays open before a trial call
    pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
}
