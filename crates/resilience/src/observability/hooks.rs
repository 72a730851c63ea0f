//! Observability hooks for pattern lifecycle events

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::core::ErrorKind;
use crate::patterns::circuit_breaker::CircuitState;

/// Log level for [`LoggingHook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Events emitted by the resilience wrappers
#[derive(Debug, Clone, PartialEq)]
pub enum PatternEvent {
    /// A failed attempt will be retried after `delay`
    RetryScheduled {
        /// Operation label
        operation: String,
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Total attempts allowed
        max_attempts: u32,
        /// Sleep before the next attempt
        delay: Duration,
        /// Kind of the error that triggered the retry
        kind: ErrorKind,
    },
    /// The retry loop gave up and surfaced the last error
    RetryExhausted {
        /// Operation label
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Kind of the final error
        kind: ErrorKind,
    },
    /// A circuit breaker moved between states
    CircuitStateChanged {
        /// Breaker name
        name: String,
        /// Previous state
        from: CircuitState,
        /// New state
        to: CircuitState,
    },
    /// A circuit breaker rejected a call without running it
    CircuitRejected {
        /// Breaker name
        name: String,
        /// State at rejection time
        state: CircuitState,
    },
    /// A timeout guard gave up on its operation
    TimedOut {
        /// Operation label
        operation: String,
        /// Configured deadline
        timeout: Duration,
    },
}

impl PatternEvent {
    /// Pattern that emitted the event
    #[must_use]
    pub const fn pattern(&self) -> &'static str {
        match self {
            Self::RetryScheduled { .. } | Self::RetryExhausted { .. } => "retry",
            Self::CircuitStateChanged { .. } | Self::CircuitRejected { .. } => "circuit_breaker",
            Self::TimedOut { .. } => "timeout",
        }
    }
}

impl fmt::Display for PatternEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryScheduled {
                operation,
                attempt,
                max_attempts,
                delay,
                kind,
            } => write!(
                f,
                "retry {attempt}/{max_attempts} for {operation} in {delay:?} after {kind} error"
            ),
            Self::RetryExhausted {
                operation,
                attempts,
                kind,
            } => write!(
                f,
                "retry gave up on {operation} after {attempts} attempts ({kind})"
            ),
            Self::CircuitStateChanged { name, from, to } => {
                write!(f, "circuit breaker {name} changed from {from} to {to}")
            }
            Self::CircuitRejected { name, state } => {
                write!(f, "circuit breaker {name} rejected a call while {state}")
            }
            Self::TimedOut { operation, timeout } => {
                write!(f, "{operation} timed out after {timeout:?}")
            }
        }
    }
}

/// Receiver for [`PatternEvent`]s
///
/// Hooks run synchronously on the calling thread, after any internal lock
/// has been released, so a hook may call back into the breaker that emitted
/// the event.
pub trait ObservabilityHook: Send + Sync {
    /// Called for every emitted event
    fn on_event(&self, event: &PatternEvent);
}

/// Collection of observability hooks
#[derive(Default, Clone)]
pub struct ObservabilityHooks {
    hooks: Arc<Vec<Arc<dyn ObservabilityHook>>>,
}

impl ObservabilityHooks {
    /// Create an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook to the collection
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn ObservabilityHook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    /// Emit an event to all hooks
    pub fn emit(&self, event: &PatternEvent) {
        for hook in self.hooks.iter() {
            hook.on_event(event);
        }
    }

    /// Number of registered hooks
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for ObservabilityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityHooks")
            .field("len", &self.hooks.len())
            .finish()
    }
}

/// Hook that writes every event through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct LoggingHook {
    level: LogLevel,
}

impl LoggingHook {
    /// Create a new logging hook
    #[must_use]
    pub const fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl ObservabilityHook for LoggingHook {
    fn on_event(&self, event: &PatternEvent) {
        let pattern = event.pattern();
        match self.level {
            LogLevel::Error => tracing::error!(pattern, "{event}"),
            LogLevel::Warn => tracing::warn!(pattern, "{event}"),
            LogLevel::Info => tracing::info!(pattern, "{event}"),
            LogLevel::Debug => tracing::debug!(pattern, "{event}"),
            LogLevel::Trace => tracing::trace!(pattern, "{event}"),
        }
    }
}

/// Hook that counts events by a dotted metric key
///
/// Keys look like `retry.scheduled`, `circuit_breaker.jira.state.open` or
/// `timeout.llm.completion`.
#[derive(Debug, Default)]
pub struct MetricsHook {
    counters: DashMap<String, u64>,
}

impl MetricsHook {
    /// Create a new metrics hook
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one counter
    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).map_or(0, |value| *value)
    }

    /// Snapshot of all counters, sorted by key
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn increment(&self, key: String) {
        *self.counters.entry(key).or_insert(0) += 1;
    }
}

impl ObservabilityHook for MetricsHook {
    fn on_event(&self, event: &PatternEvent) {
        match event {
            PatternEvent::RetryScheduled { .. } => self.increment("retry.scheduled".to_string()),
            PatternEvent::RetryExhausted { .. } => self.increment("retry.exhausted".to_string()),
            PatternEvent::CircuitStateChanged { name, to, .. } => {
                self.increment(format!("circuit_breaker.{name}.state.{to}"));
            }
            PatternEvent::CircuitRejected { name, .. } => {
                self.increment(format!("circuit_breaker.{name}.rejected"));
            }
            PatternEvent::TimedOut { operation, .. } => {
                self.increment(format!("timeout.{operation}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state_change(to: CircuitState) -> PatternEvent {
        PatternEvent::CircuitStateChanged {
            name: "jira".to_string(),
            from: CircuitState::Closed,
            to,
        }
    }

    #[test]
    fn test_pattern_event_display() {
        assert_eq!(
            state_change(CircuitState::Open).to_string(),
            "circuit breaker jira changed from closed to open"
        );

        let event = PatternEvent::RetryScheduled {
            operation: "confluence.search".to_string(),
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_millis(200),
            kind: ErrorKind::RateLimited,
        };
        assert_eq!(
            event.to_string(),
            "retry 1/3 for confluence.search in 200ms after rate_limited error"
        );
        assert_eq!(event.pattern(), "retry");
    }

    #[test]
    fn test_metrics_hook_counts_by_key() {
        let hook = MetricsHook::new();
        hook.on_event(&state_change(CircuitState::Open));
        hook.on_event(&state_change(CircuitState::Open));
        hook.on_event(&PatternEvent::TimedOut {
            operation: "llm".to_string(),
            timeout: Duration::from_secs(1),
        });

        assert_eq!(hook.counter("circuit_breaker.jira.state.open"), 2);
        assert_eq!(hook.counter("timeout.llm"), 1);
        assert_eq!(hook.counter("retry.scheduled"), 0);
        assert_eq!(hook.snapshot().len(), 2);
    }

    #[test]
    fn test_hooks_fan_out() {
        let metrics = Arc::new(MetricsHook::new());
        let hooks = ObservabilityHooks::new()
            .with_hook(Arc::new(LoggingHook::new(LogLevel::Debug)))
            .with_hook(metrics.clone());
        assert_eq!(hooks.len(), 2);

        hooks.emit(&PatternEvent::CircuitRejected {
            name: "datadog".to_string(),
            state: CircuitState::Open,
        });
        assert_eq!(metrics.counter("circuit_breaker.datadog.rejected"), 1);
    }
}
