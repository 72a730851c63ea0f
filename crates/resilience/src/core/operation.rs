//! The callable shape every wrapper consumes and produces
//!
//! A wrapper takes an operation and returns another operation with the same
//! output and error types. Blocking code implements [`Operation`], async
//! code implements [`AsyncOperation`]; closures get both for free and every
//! wrapper implements whichever trait its inner operation implements, so the
//! same nesting works in either call style.

use std::future::Future;
use std::sync::Arc;

use super::error::ConfigResult;
use crate::patterns::circuit_breaker::{CircuitBreaker, CircuitBreakerCall};
use crate::patterns::retry::{Retry, RetryConfig};
use crate::patterns::timeout::{Timeout, TimeoutConfig};

/// A blocking operation that can be invoked any number of times
pub trait Operation {
    /// Success value
    type Output;
    /// Failure value
    type Error;

    /// Invoke the operation on the calling thread
    fn call(&self) -> Result<Self::Output, Self::Error>;
}

impl<F, T, E> Operation for F
where
    F: Fn() -> Result<T, E>,
{
    type Output = T;
    type Error = E;

    fn call(&self) -> Result<T, E> {
        self()
    }
}

/// An async operation that can be invoked any number of times
///
/// The returned future is `Send` so wrapped operations can be spawned on a
/// multi-threaded runtime.
pub trait AsyncOperation: Send + Sync {
    /// Success value
    type Output: Send;
    /// Failure value
    type Error: Send;

    /// Start one invocation
    fn call_async(&self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

impl<F, Fut, T, E> AsyncOperation for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
{
    type Output = T;
    type Error = E;

    fn call_async(&self) -> impl Future<Output = Result<T, E>> + Send {
        self()
    }
}

/// Fluent nesting for any operation
///
/// Retry and timeout policies are validated when they are attached.
///
/// ```
/// use std::time::Duration;
/// use agentry_resilience::{Operation, OperationExt, RetryConfig, TimeoutConfig};
///
/// let fetch = (|| Ok::<_, std::io::Error>("issue body"))
///     .with_timeout(TimeoutConfig::new("jira.fetch", Duration::from_secs(5)))?
///     .with_retry(RetryConfig::new(3).with_jitter(false))?;
///
/// assert_eq!(fetch.call()?, "issue body");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub trait OperationExt: Sized {
    /// Retry this operation per `config`
    fn with_retry(self, config: RetryConfig) -> ConfigResult<Retry<Self>> {
        crate::patterns::retry::retry(self, config)
    }

    /// Guard this operation with `breaker`
    fn with_circuit_breaker(self, breaker: Arc<CircuitBreaker>) -> CircuitBreakerCall<Self> {
        crate::patterns::circuit_breaker::circuit_breaker(self, breaker)
    }

    /// Enforce a deadline on this operation
    fn with_timeout(self, config: TimeoutConfig) -> ConfigResult<Timeout<Self>> {
        crate::patterns::timeout::timeout(self, config)
    }
}

impl<Op> OperationExt for Op {}
