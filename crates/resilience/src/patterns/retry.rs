//! Retry with backoff
//!
//! [`Retry`] re-invokes its inner operation while failures classify as
//! retryable and attempts remain. The final error is always the inner
//! operation's own error, never a wrapper type.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, warn};

use super::backoff::BackoffStrategy;
use crate::core::config::{ResilienceConfig, ensure};
use crate::core::constants::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_RETRY_ATTEMPTS};
use crate::core::{AsyncOperation, Classify, ConfigResult, ErrorKind, Operation};
use crate::observability::{ObservabilityHooks, PatternEvent};

/// What a retry predicate gets to look at
#[derive(Debug, Clone, Copy)]
pub struct RetryAttempt<'a> {
    /// The error just raised
    pub error: &'a (dyn Error + 'static),
    /// Its classification
    pub kind: ErrorKind,
    /// Attempt that raised it (1-based)
    pub attempt: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
}

/// Custom retry decision, overriding kind-based classification
pub type RetryPredicate = Arc<dyn Fn(&RetryAttempt<'_>) -> bool + Send + Sync>;

/// Retry policy configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    /// Delay before the first retry
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub max_delay: Duration,
    /// Delay curve
    pub strategy: BackoffStrategy,
    /// Scale each delay by a random factor in `[0.5, 1.5]`
    pub jitter: bool,
    /// Kinds to retry instead of the default transient set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<BTreeSet<ErrorKind>>,
    /// Predicate that decides instead of `retry_on` and the default set
    #[serde(skip)]
    pub retry_condition: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: BackoffStrategy::default(),
            jitter: true,
            retry_on: None,
            retry_condition: None,
        }
    }
}

impl RetryConfig {
    /// Default policy with `max_attempts` total attempts
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Set the first retry delay
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the delay curve
    #[must_use]
    pub const fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry exactly these kinds
    #[must_use]
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = Some(kinds.into_iter().collect());
        self
    }

    /// Decide retries with a custom predicate
    #[must_use]
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RetryAttempt<'_>) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(predicate));
        self
    }

    /// Whether the failure described by `attempt` should be retried,
    /// ignoring the attempt budget
    #[must_use]
    pub fn is_retryable(&self, attempt: &RetryAttempt<'_>) -> bool {
        match (&self.retry_condition, &self.retry_on) {
            (Some(predicate), _) => predicate(attempt),
            (None, Some(kinds)) => kinds.contains(&attempt.kind),
            (None, None) => attempt.kind.is_transient(),
        }
    }

    /// Sleep before retrying after the `attempt`-th failure (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.delay(
            attempt.saturating_sub(1),
            self.base_delay,
            self.max_delay,
            self.jitter,
        )
    }
}

impl ResilienceConfig for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        ensure(self.max_attempts >= 1, "max_attempts", "must be at least 1")?;
        ensure(
            self.max_delay >= self.base_delay,
            "max_delay",
            "must not be shorter than base_delay",
        )
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("strategy", &self.strategy)
            .field("jitter", &self.jitter)
            .field("retry_on", &self.retry_on)
            .field("retry_condition", &self.retry_condition.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Operation wrapped with a retry policy
pub struct Retry<Op> {
    inner: Op,
    config: RetryConfig,
    hooks: ObservabilityHooks,
    name: String,
}

/// Wrap `operation` with `config`, rejecting an invalid policy
pub fn retry<Op>(operation: Op, config: RetryConfig) -> ConfigResult<Retry<Op>> {
    config.validate()?;
    Ok(Retry {
        inner: operation,
        config,
        hooks: ObservabilityHooks::default(),
        name: "operation".to_string(),
    })
}

impl<Op> Retry<Op> {
    /// Label used in logs and events
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Deliver retry events to `hooks`
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Policy in effect
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wrapped operation
    pub const fn inner(&self) -> &Op {
        &self.inner
    }

    /// `None` when the error must be surfaced, otherwise the sleep before
    /// the next attempt
    fn next_delay<E>(&self, error: &E, attempt: u32, elapsed: Duration) -> Option<Duration>
    where
        E: Error + Classify + 'static,
    {
        let kind = error.kind();
        let retryable = self.config.is_retryable(&RetryAttempt {
            error,
            kind,
            attempt,
            elapsed,
        });
        if !retryable {
            debug!(operation = %self.name, attempt, %kind, "error is not retryable");
            return None;
        }

        if attempt >= self.config.max_attempts {
            warn!(
                operation = %self.name,
                attempts = attempt,
                %kind,
                error = %error,
                "retry attempts exhausted"
            );
            self.hooks.emit(&PatternEvent::RetryExhausted {
                operation: self.name.clone(),
                attempts: attempt,
                kind,
            });
            return None;
        }

        let delay = self.config.delay_for(attempt);
        debug!(
            operation = %self.name,
            attempt,
            max_attempts = self.config.max_attempts,
            %kind,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying after failure"
        );
        self.hooks.emit(&PatternEvent::RetryScheduled {
            operation: self.name.clone(),
            attempt,
            max_attempts: self.config.max_attempts,
            delay,
            kind,
        });
        Some(delay)
    }
}

impl<Op: fmt::Debug> fmt::Debug for Retry<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<Op> Operation for Retry<Op>
where
    Op: Operation,
    Op::Error: Error + Classify + 'static,
{
    type Output = Op::Output;
    type Error = Op::Error;

    fn call(&self) -> Result<Self::Output, Self::Error> {
        let started = std::time::Instant::now();
        let mut attempt = 1;
        loop {
            match self.inner.call() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = %self.name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let Some(delay) = self.next_delay(&error, attempt, started.elapsed()) else {
                        return Err(error);
                    };
                    drop(error);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl<Op> AsyncOperation for Retry<Op>
where
    Op: AsyncOperation,
    Op::Error: Error + Classify + 'static,
{
    type Output = Op::Output;
    type Error = Op::Error;

    fn call_async(&self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send {
        let span = tracing::debug_span!(
            "retry",
            operation = %self.name,
            max_attempts = self.config.max_attempts
        );
        async move {
            let started = tokio::time::Instant::now();
            let mut attempt = 1;
            loop {
                match self.inner.call_async().await {
                    Ok(value) => {
                        if attempt > 1 {
                            debug!(attempt, "succeeded after retry");
                        }
                        return Ok(value);
                    }
                    Err(error) => {
                        let Some(delay) = self.next_delay(&error, attempt, started.elapsed())
                        else {
                            return Err(error);
                        };
                        drop(error);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }
        .instrument(span)
    }
}
