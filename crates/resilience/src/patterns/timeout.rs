//! Deadline enforcement
//!
//! Async operations are raced against `tokio::time::timeout`; on expiry the
//! operation's future is dropped, so it stops at its next await point.
//! Blocking operations run on the caller's thread with their deadline
//! published as the thread's current [`Deadline`]; work that polls it stops
//! early, and a result that arrives after the deadline is discarded. In
//! both cases the guard's [`CancellationToken`], if one is attached, is
//! cancelled so work that escaped the guard can notice and stop.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, warn};

use crate::core::config::{ResilienceConfig, ensure};
use crate::core::constants::DEFAULT_TIMEOUT;
use crate::core::{AsyncOperation, ConfigResult, Operation, TimeoutError};
use crate::observability::{ObservabilityHooks, PatternEvent};

/// Timeout guard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one call
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub timeout: Duration,
    /// Label used in errors, logs and events
    pub operation_name: String,
    /// Message for the raised [`TimeoutError`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            operation_name: "operation".to_string(),
            error_message: None,
        }
    }
}

impl TimeoutConfig {
    /// Deadline of `timeout` for the operation labelled `operation_name`
    #[must_use]
    pub fn new(operation_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            timeout,
            operation_name: operation_name.into(),
            error_message: None,
        }
    }

    /// Override the generated error message
    #[must_use]
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Error describing an expiry after `elapsed`
    #[must_use]
    pub fn error(&self, elapsed: Duration) -> TimeoutError {
        let message = self.error_message.clone().unwrap_or_else(|| {
            format!(
                "{} timed out after {:.3}s",
                self.operation_name,
                self.timeout.as_secs_f64()
            )
        });
        TimeoutError {
            operation_name: self.operation_name.clone(),
            timeout: self.timeout,
            elapsed,
            message,
        }
    }
}

impl ResilienceConfig for TimeoutConfig {
    fn validate(&self) -> ConfigResult<()> {
        ensure(!self.timeout.is_zero(), "timeout", "must be positive")?;
        ensure(
            !self.operation_name.is_empty(),
            "operation_name",
            "must not be empty",
        )
    }
}

/// Operation guarded by a deadline
pub struct Timeout<Op> {
    inner: Op,
    config: TimeoutConfig,
    token: Option<CancellationToken>,
    hooks: ObservabilityHooks,
}

/// Enforce `config` on `operation`, rejecting an invalid deadline
pub fn timeout<Op>(operation: Op, config: TimeoutConfig) -> ConfigResult<Timeout<Op>> {
    config.validate()?;
    Ok(Timeout {
        inner: operation,
        config,
        token: None,
        hooks: ObservabilityHooks::default(),
    })
}

thread_local! {
    static DEADLINE: RefCell<Option<Deadline>> = const { RefCell::new(None) };
}

/// Deadline of the blocking [`Timeout`] calls running on this thread
///
/// Blocking operations have no await point to be stopped at, so the guard
/// publishes its deadline for the duration of the call and long-running
/// work polls it. Nested guards expose the earliest deadline.
///
/// ```
/// use std::time::Duration;
/// use agentry_resilience::patterns::timeout::Deadline;
/// use agentry_resilience::{Operation, OperationExt, TimeoutConfig};
///
/// let export = (|| {
///     let mut pages = Vec::new();
///     while pages.len() < 100 && !Deadline::expired() {
///         pages.push(format!("page-{}", pages.len()));
///     }
///     Ok::<_, std::io::Error>(pages)
/// })
/// .with_timeout(TimeoutConfig::new("confluence.export", Duration::from_secs(5)))?;
///
/// assert_eq!(export.call()?.len(), 100);
/// assert!(Deadline::current().is_none());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Deadline {
    at: std::time::Instant,
    token: Option<CancellationToken>,
}

impl Deadline {
    /// Innermost deadline on this thread, if a blocking guard is running
    pub fn current() -> Option<Self> {
        DEADLINE.with(|cell| cell.borrow().clone())
    }

    /// Whether a running guard's deadline has passed
    ///
    /// `false` outside any blocking guard.
    pub fn expired() -> bool {
        Self::current().is_some_and(|deadline| deadline.is_expired())
    }

    /// Instant the call expires at
    pub const fn instant(&self) -> std::time::Instant {
        self.at
    }

    /// Time left before expiry, zero once passed
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(std::time::Instant::now())
    }

    /// Whether the deadline has passed; cancels the guard's token when it has
    pub fn is_expired(&self) -> bool {
        let expired = std::time::Instant::now() >= self.at;
        if expired && let Some(token) = &self.token {
            token.cancel();
        }
        expired
    }
}

/// Publishes a deadline until dropped, restoring the outer one
struct DeadlineScope {
    previous: Option<Deadline>,
}

impl DeadlineScope {
    fn enter(deadline: Deadline) -> Self {
        let previous = DEADLINE.with(|cell| {
            let mut current = cell.borrow_mut();
            let effective = match current.as_ref() {
                Some(outer) if outer.at <= deadline.at => outer.clone(),
                _ => deadline,
            };
            current.replace(effective)
        });
        Self { previous }
    }
}

impl Drop for DeadlineScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = DEADLINE.try_with(|cell| *cell.borrow_mut() = previous);
    }
}

impl<Op> Timeout<Op> {
    /// Cancel `token` whenever a call expires
    ///
    /// The token stays cancelled afterwards; hand each guarded task its own
    /// child token when calls must be cancelled independently.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Deliver expiry events to `hooks`
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attached cancellation token
    pub const fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// Configuration in effect
    pub const fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    fn expire(&self, elapsed: Duration) -> TimeoutError {
        if let Some(token) = &self.token {
            token.cancel();
        }
        warn!(
            operation = %self.config.operation_name,
            timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "operation timed out"
        );
        self.hooks.emit(&PatternEvent::TimedOut {
            operation: self.config.operation_name.clone(),
            timeout: self.config.timeout,
        });
        self.config.error(elapsed)
    }
}

impl<Op: fmt::Debug> fmt::Debug for Timeout<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<Op> Operation for Timeout<Op>
where
    Op: Operation,
    Op::Error: From<TimeoutError>,
{
    type Output = Op::Output;
    type Error = Op::Error;

    fn call(&self) -> Result<Self::Output, Self::Error> {
        let started = std::time::Instant::now();
        let result = {
            let _scope = started.checked_add(self.config.timeout).map(|at| {
                DeadlineScope::enter(Deadline {
                    at,
                    token: self.token.clone(),
                })
            });
            self.inner.call()
        };
        let elapsed = started.elapsed();
        if elapsed >= self.config.timeout {
            drop(result);
            return Err(self.expire(elapsed).into());
        }
        result
    }
}

impl<Op> AsyncOperation for Timeout<Op>
where
    Op: AsyncOperation,
    Op::Error: From<TimeoutError>,
{
    type Output = Op::Output;
    type Error = Op::Error;

    fn call_async(&self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send {
        let span = tracing::debug_span!(
            "timeout",
            operation = %self.config.operation_name,
            timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX)
        );
        async move {
            let started = tokio::time::Instant::now();
            match tokio::time::timeout(self.config.timeout, self.inner.call_async()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(self.expire(started.elapsed()).into()),
            }
        }
        .instrument(span)
    }
}
