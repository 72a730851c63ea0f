//! # Agentry Resilience
//!
//! Fault-tolerance wrappers for calls from the agent backend to external
//! services: LLM providers, Jira, Confluence, Datadog and databases.
//!
//! ## Features
//!
//! - **Retry**: exponential, linear or constant backoff with jitter, driven
//!   by an explicit error taxonomy ([`ErrorKind`])
//! - **Circuit Breaker**: named three-state breakers with a sliding failure
//!   window, shared through a [`CircuitBreakerRegistry`]
//! - **Timeout**: deadlines with cooperative cancellation
//!
//! Every wrapper has the shape `wrap(operation, config) -> operation` and
//! works for blocking ([`Operation`]) and async ([`AsyncOperation`])
//! operations alike. Nesting order matters: a breaker around a retry sees the
//! whole retry loop as one call, a retry around a breaker stops as soon as
//! the breaker rejects.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use agentry_resilience::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = CircuitBreakerRegistry::new();
//!     let breaker = registry.get_or_create(
//!         CircuitBreakerConfig::new("jira").with_failure_threshold(5),
//!     )?;
//!
//!     let search = (|| async { Ok::<_, std::io::Error>(vec!["PROJ-1"]) })
//!         .with_timeout(TimeoutConfig::new("jira.search", Duration::from_secs(10)))?
//!         .with_retry(RetryConfig::new(3))?
//!         .with_circuit_breaker(breaker);
//!
//!     let issues = search.call_async().await?;
//!     assert_eq!(issues, ["PROJ-1"]);
//!     assert_eq!(registry.stats("jira").unwrap().state, CircuitState::Closed);
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod core;
pub mod observability;
pub mod patterns;

pub use crate::core::{
    AsyncOperation, CircuitBreakerOpenError, Classify, ConfigError, ConfigResult,
    DEFAULT_TRANSIENT_KINDS, ErrorKind, Operation, OperationExt, ResilienceConfig,
    ResilienceProfile, TimeoutError,
};

pub use crate::patterns::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerCall, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitBreakerStats, CircuitState, Deadline, Fallback, Retry,
    RetryAttempt, RetryConfig, Timeout, TimeoutConfig, circuit_breaker,
    get_all_circuit_breaker_stats, get_circuit_breaker_stats, retry, timeout,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::core::{
        AsyncOperation, CircuitBreakerOpenError, Classify, ErrorKind, Operation, OperationExt,
        ResilienceConfig, TimeoutError,
    };
    pub use crate::patterns::{
        BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
        CircuitState, Deadline, RetryConfig, TimeoutConfig,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
