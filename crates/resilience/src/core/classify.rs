//! Explicit error taxonomy shared by every policy
//!
//! Policies never inspect concrete error types. A caller's error reports an
//! [`ErrorKind`] through [`Classify`], and each policy turns kinds into its
//! own decision: the retry policy asks "transient or permanent?", the
//! breaker asks "failure, ignored, or not circuit-affecting?".

use std::collections::BTreeSet;
use std::io;

use serde::{Deserialize, Serialize};

use super::error::{CircuitBreakerOpenError, TimeoutError};

/// Coarse failure category used by policy decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, reset, or dropped
    Connection,
    /// The remote side or a local deadline timed out
    Timeout,
    /// The remote side asked us to slow down
    RateLimited,
    /// The remote side is temporarily unavailable (5xx, maintenance)
    Unavailable,
    /// A circuit breaker rejected the call
    CircuitOpen,
    /// The request itself is malformed
    InvalidInput,
    /// The requested entity does not exist
    NotFound,
    /// Authentication or authorization failed
    Unauthorized,
    /// A bug or invariant violation on either side
    Internal,
    /// Anything the error type does not categorize
    Other,
}

/// Kinds the retry policy treats as transient when no explicit allow-list or
/// predicate is configured.
///
/// `CircuitOpen` is not in the set, so a retry loop wrapped around a breaker
/// stops as soon as the breaker rejects.
pub const DEFAULT_TRANSIENT_KINDS: &[ErrorKind] = &[
    ErrorKind::Connection,
    ErrorKind::Timeout,
    ErrorKind::RateLimited,
    ErrorKind::Unavailable,
];

impl ErrorKind {
    /// Whether the kind belongs to [`DEFAULT_TRANSIENT_KINDS`]
    #[must_use]
    pub fn is_transient(self) -> bool {
        DEFAULT_TRANSIENT_KINDS.contains(&self)
    }

    /// Default transient set as an owned allow-list
    #[must_use]
    pub fn transient_set() -> BTreeSet<Self> {
        DEFAULT_TRANSIENT_KINDS.iter().copied().collect()
    }

    /// Stable snake_case name, matching the serialized form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::CircuitOpen => "circuit_open",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Internal => "internal",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error value to its [`ErrorKind`]
///
/// ```
/// use agentry_resilience::{Classify, ErrorKind};
///
/// #[derive(Debug)]
/// enum JiraError {
///     Throttled,
///     BadJql,
/// }
///
/// impl Classify for JiraError {
///     fn kind(&self) -> ErrorKind {
///         match self {
///             Self::Throttled => ErrorKind::RateLimited,
///             Self::BadJql => ErrorKind::InvalidInput,
///         }
///     }
/// }
///
/// assert!(JiraError::Throttled.kind().is_transient());
/// assert!(!JiraError::BadJql.kind().is_transient());
/// ```
pub trait Classify {
    /// Category of this error
    fn kind(&self) -> ErrorKind;
}

impl Classify for CircuitBreakerOpenError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::CircuitOpen
    }
}

impl Classify for TimeoutError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Timeout
    }
}

impl Classify for io::Error {
    fn kind(&self) -> ErrorKind {
        if let Some(inner) = self.get_ref() {
            if inner.is::<CircuitBreakerOpenError>() {
                return ErrorKind::CircuitOpen;
            }
            if inner.is::<TimeoutError>() {
                return ErrorKind::Timeout;
            }
        }

        use io::ErrorKind as Io;
        match io::Error::kind(self) {
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::AddrNotAvailable
            | Io::UnexpectedEof => ErrorKind::Connection,
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::Interrupted => ErrorKind::Unavailable,
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::Unauthorized,
            Io::InvalidInput | Io::InvalidData => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        }
    }
}

impl<E: Classify + ?Sized> Classify for Box<E> {
    fn kind(&self) -> ErrorKind {
        (**self).kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::circuit_breaker::CircuitState;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, ErrorKind::Connection)]
    #[case(io::ErrorKind::ConnectionReset, ErrorKind::Connection)]
    #[case(io::ErrorKind::TimedOut, ErrorKind::Timeout)]
    #[case(io::ErrorKind::Interrupted, ErrorKind::Unavailable)]
    #[case(io::ErrorKind::NotFound, ErrorKind::NotFound)]
    #[case(io::ErrorKind::PermissionDenied, ErrorKind::Unauthorized)]
    #[case(io::ErrorKind::InvalidData, ErrorKind::InvalidInput)]
    #[case(io::ErrorKind::Unsupported, ErrorKind::Other)]
    fn io_errors_map_to_kinds(#[case] io_kind: io::ErrorKind, #[case] expected: ErrorKind) {
        assert_eq!(Classify::kind(&io::Error::from(io_kind)), expected);
    }

    #[test]
    fn wrapped_resilience_errors_keep_their_kind() {
        let open: io::Error = CircuitBreakerOpenError {
            name: "confluence".to_string(),
            state: CircuitState::Open,
            retry_after: None,
        }
        .into();
        // `io::Error` has an inherent `kind`, so go through the trait explicitly
        assert_eq!(Classify::kind(&open), ErrorKind::CircuitOpen);

        let timed_out: io::Error = TimeoutError {
            operation_name: "datadog.query".to_string(),
            timeout: Duration::from_secs(1),
            elapsed: Duration::from_secs(1),
            message: "slow".to_string(),
        }
        .into();
        assert_eq!(Classify::kind(&timed_out), ErrorKind::Timeout);
    }

    #[test]
    fn default_transient_set_excludes_circuit_open() {
        assert!(ErrorKind::Connection.is_transient());
        assert!(ErrorKind::RateLimited.is_transient());
        assert!(!ErrorKind::CircuitOpen.is_transient());
        assert!(!ErrorKind::InvalidInput.is_transient());
        assert_eq!(ErrorKind::transient_set().len(), DEFAULT_TRANSIENT_KINDS.len());
    }

    #[test]
    fn serialized_names_match_as_str() {
        for kind in [ErrorKind::RateLimited, ErrorKind::CircuitOpen, ErrorKind::Other] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
