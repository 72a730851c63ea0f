//! Error types raised by the resilience wrappers themselves
//!
//! Wrappers never replace the caller's error type. When a wrapper has to
//! raise its own failure it builds one of these values and converts it into
//! the operation's error type through `From`, so `std::io::Error` and any
//! `thiserror` enum with a `#[from]` variant compose without adapters.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::patterns::circuit_breaker::CircuitState;

/// The breaker rejected the call without invoking the operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is {state}{}", retry_hint(.retry_after.as_ref()))]
pub struct CircuitBreakerOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,
    /// State observed at admission time
    pub state: CircuitState,
    /// Time left until the breaker admits a trial call, when known
    pub retry_after: Option<Duration>,
}

fn retry_hint(retry_after: Option<&Duration>) -> String {
    match retry_after {
        Some(after) => format!(" (retry after {after:?})"),
        None => String::new(),
    }
}

/// The guarded operation did not finish before its deadline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (elapsed {elapsed:?})")]
pub struct TimeoutError {
    /// Label of the operation that timed out
    pub operation_name: String,
    /// Configured deadline
    pub timeout: Duration,
    /// Time actually spent before the guard gave up
    pub elapsed: Duration,
    /// Configured message, or a generated default
    pub message: String,
}

impl TimeoutError {
    /// Configured deadline in fractional seconds
    #[must_use]
    pub fn timeout_seconds(&self) -> f64 {
        self.timeout.as_secs_f64()
    }
}

/// Invalid policy configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("invalid `{field}`: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A serialized profile could not be decoded
    #[error("failed to decode resilience profile: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ConfigError {
    /// Create a validation error for `field`
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Result of validating or loading configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<CircuitBreakerOpenError> for io::Error {
    fn from(error: CircuitBreakerOpenError) -> Self {
        Self::other(error)
    }
}

impl From<TimeoutError> for io::Error {
    fn from(error: TimeoutError) -> Self {
        Self::new(io::ErrorKind::TimedOut, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_error_display_includes_retry_hint() {
        let error = CircuitBreakerOpenError {
            name: "jira".to_string(),
            state: CircuitState::Open,
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(
            error.to_string(),
            "circuit breaker 'jira' is open (retry after 5s)"
        );

        let busy = CircuitBreakerOpenError {
            retry_after: None,
            state: CircuitState::HalfOpen,
            ..error
        };
        assert_eq!(busy.to_string(), "circuit breaker 'jira' is half_open");
    }

    #[test]
    fn timeout_error_reports_seconds() {
        let error = TimeoutError {
            operation_name: "llm.completion".to_string(),
            timeout: Duration::from_millis(1500),
            elapsed: Duration::from_millis(1501),
            message: "completion took too long".to_string(),
        };
        assert!((error.timeout_seconds() - 1.5).abs() < f64::EPSILON);
        assert!(error.to_string().starts_with("completion took too long"));
    }

    #[test]
    fn io_conversion_keeps_the_source() {
        let io_error: io::Error = TimeoutError {
            operation_name: "db".to_string(),
            timeout: Duration::from_secs(1),
            elapsed: Duration::from_secs(2),
            message: "slow".to_string(),
        }
        .into();
        assert_eq!(io_error.kind(), io::ErrorKind::TimedOut);
        assert!(
            io_error
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<TimeoutError>())
                .is_some()
        );
    }
}
