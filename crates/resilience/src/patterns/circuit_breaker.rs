//! Circuit breaker state machine
//!
//! ```text
//! Closed --(failures in window >= threshold)--> Open
//! Open --(recovery_timeout elapsed, next call)--> HalfOpen
//! HalfOpen --(trial fails)--> Open
//! HalfOpen --(success_threshold trial successes)--> Closed
//! ```
//!
//! All state for one breaker sits behind a single mutex. The lock covers
//! admission and outcome recording, and is never held while the guarded
//! operation runs, so the same breaker serves blocking and async callers.
//! HalfOpen admits one trial at a time; callers that find the trial slot
//! taken are rejected exactly like Open.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use crate::core::config::{ResilienceConfig, ensure};
use crate::core::constants::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW, DEFAULT_RECOVERY_TIMEOUT,
};
use crate::core::{
    AsyncOperation, CircuitBreakerOpenError, Classify, ConfigResult, ErrorKind, Operation,
};
use crate::observability::{ObservabilityHooks, PatternEvent};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through and failures are counted
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// One trial call at a time probes the dependency
    HalfOpen,
}

impl CircuitState {
    /// Stable snake_case name, matching the serialized form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the breaker treats one error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Counts toward opening the breaker
    Failure,
    /// Outside `failure_kinds`; propagated without bookkeeping
    NotCounted,
    /// In `ignored_kinds`; bypasses the breaker entirely
    Ignored,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Registry key
    pub name: String,
    /// Failures within `failure_window` that open the breaker
    pub failure_threshold: u32,
    /// Sliding window for counting failures
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub failure_window: Duration,
    /// Time spent Open before a trial call is admitted
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub recovery_timeout: Duration,
    /// Consecutive trial successes needed to close
    pub success_threshold: u32,
    /// Kinds that count as failures; `None` counts every kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kinds: Option<BTreeSet<ErrorKind>>,
    /// Kinds that neither count nor release a trial as a success
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_kinds: BTreeSet<ErrorKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            success_threshold: 1,
            failure_kinds: None,
            ignored_kinds: BTreeSet::new(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Default configuration for the breaker called `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the failure threshold
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the sliding failure window
    #[must_use]
    pub const fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Set the recovery timeout
    #[must_use]
    pub const fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the number of trial successes needed to close
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Count only these kinds as failures
    #[must_use]
    pub fn count_only(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.failure_kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Let these kinds bypass the breaker
    #[must_use]
    pub fn ignore(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.ignored_kinds.extend(kinds);
        self
    }

    /// Classify one error kind
    #[must_use]
    pub fn verdict(&self, kind: ErrorKind) -> Verdict {
        if self.ignored_kinds.contains(&kind) {
            Verdict::Ignored
        } else if self
            .failure_kinds
            .as_ref()
            .is_some_and(|kinds| !kinds.contains(&kind))
        {
            Verdict::NotCounted
        } else {
            Verdict::Failure
        }
    }
}

impl ResilienceConfig for CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        ensure(!self.name.is_empty(), "name", "must not be empty")?;
        ensure(self.failure_threshold >= 1, "failure_threshold", "must be at least 1")?;
        ensure(self.success_threshold >= 1, "success_threshold", "must be at least 1")?;
        ensure(!self.failure_window.is_zero(), "failure_window", "must be positive")?;
        ensure(!self.recovery_timeout.is_zero(), "recovery_timeout", "must be positive")
    }
}

/// Point-in-time copy of one breaker's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failures inside the sliding window
    pub failure_count: u32,
    /// Trial successes recorded in the current HalfOpen phase
    pub success_count: u32,
    /// Failures recorded since creation or the last reset
    pub total_failures: u64,
    /// Successes recorded since creation or the last reset
    pub total_successes: u64,
    /// Calls rejected without running
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    // bumped whenever a trial slot is granted or invalidated
    generation: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
}

impl BreakerState {
    fn new(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            half_open_successes: 0,
            opened_at: None,
            trial_in_flight: false,
            generation,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn grant_trial(&mut self) -> u64 {
        self.trial_in_flight = true;
        self.generation += 1;
        self.generation
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
        self.trial_in_flight = false;
        self.generation += 1;
    }
}

type Transition = (CircuitState, CircuitState);

/// A named circuit breaker
///
/// Breakers are usually obtained from a
/// [`CircuitBreakerRegistry`](super::registry::CircuitBreakerRegistry) so that
/// every caller using a name shares one state object.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    hooks: ObservabilityHooks,
}

impl CircuitBreaker {
    /// Create a Closed breaker after validating `config`
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(BreakerState::new(0)),
            hooks: ObservabilityHooks::default(),
        })
    }

    /// Deliver state changes and rejections to `hooks`
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration in effect
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    ///
    /// An Open breaker whose recovery timeout has elapsed still reports
    /// Open until the next call is admitted as a trial.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// When the breaker last opened, if it is not Closed
    #[must_use]
    pub fn opened_at(&self) -> Option<Instant> {
        self.state.lock().opened_at
    }

    /// Admit or reject one call
    ///
    /// The returned [`Permit`] must be settled with the call's outcome;
    /// dropping it unsettled releases a HalfOpen trial slot without
    /// recording anything.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitBreakerOpenError> {
        let now = Instant::now();
        let mut transition = None;
        let admission = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => Ok(None),
                CircuitState::Open => {
                    let reopen_at = state
                        .opened_at
                        .and_then(|opened| opened.checked_add(self.config.recovery_timeout));
                    match reopen_at {
                        Some(at) if now >= at => {
                            state.state = CircuitState::HalfOpen;
                            state.half_open_successes = 0;
                            transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                            Ok(Some(state.grant_trial()))
                        }
                        _ => {
                            state.total_rejections += 1;
                            Err((
                                CircuitState::Open,
                                reopen_at.map(|at| at.saturating_duration_since(now)),
                            ))
                        }
                    }
                }
                CircuitState::HalfOpen if state.trial_in_flight => {
                    state.total_rejections += 1;
                    Err((CircuitState::HalfOpen, None))
                }
                CircuitState::HalfOpen => Ok(Some(state.grant_trial())),
            }
        };

        if let Some(transition) = transition {
            self.announce(transition);
        }

        match admission {
            Ok(trial) => Ok(Permit {
                breaker: self,
                trial,
                settled: false,
            }),
            Err((state, retry_after)) => {
                debug!(breaker = %self.config.name, %state, "call rejected");
                self.hooks.emit(&PatternEvent::CircuitRejected {
                    name: self.config.name.clone(),
                    state,
                });
                Err(CircuitBreakerOpenError {
                    name: self.config.name.clone(),
                    state,
                    retry_after,
                })
            }
        }
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut state = self.state.lock();
        state.prune(Instant::now(), self.config.failure_window);
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: state.state,
            failure_count: u32::try_from(state.failures.len()).unwrap_or(u32::MAX),
            success_count: state.half_open_successes,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            total_rejections: state.total_rejections,
        }
    }

    /// Return to a fresh Closed state, clearing history and counters
    ///
    /// Outstanding permits become stale and settle without effect.
    pub fn reset(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.state;
            *state = BreakerState::new(state.generation + 1);
            previous
        };
        info!(breaker = %self.config.name, from = %previous, "circuit breaker reset");
        if previous != CircuitState::Closed {
            self.announce((previous, CircuitState::Closed));
        }
    }

    fn on_success(&self, trial: Option<u64>) {
        let transition = {
            let mut state = self.state.lock();
            state.total_successes += 1;
            match trial {
                Some(generation)
                    if state.state == CircuitState::HalfOpen
                        && state.generation == generation =>
                {
                    state.trial_in_flight = false;
                    state.half_open_successes += 1;
                    if state.half_open_successes >= self.config.success_threshold {
                        state.state = CircuitState::Closed;
                        state.failures.clear();
                        state.opened_at = None;
                        state.half_open_successes = 0;
                        Some((CircuitState::HalfOpen, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    fn on_error(&self, trial: Option<u64>, kind: ErrorKind) {
        let verdict = self.config.verdict(kind);
        if verdict != Verdict::Failure {
            debug!(breaker = %self.config.name, %kind, ?verdict, "error does not affect breaker");
            self.release(trial);
            return;
        }

        let now = Instant::now();
        let (transition, failures) = {
            let mut state = self.state.lock();
            state.total_failures += 1;
            state.prune(now, self.config.failure_window);
            state.failures.push_back(now);
            let failures = state.failures.len();
            let transition = match state.state {
                CircuitState::HalfOpen => {
                    state.open(now);
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Closed
                    if failures >= self.config.failure_threshold as usize =>
                {
                    state.open(now);
                    Some((CircuitState::Closed, CircuitState::Open))
                }
                _ => None,
            };
            (transition, failures)
        };

        debug!(breaker = %self.config.name, %kind, failures, "failure recorded");
        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    fn release(&self, trial: Option<u64>) {
        if let Some(generation) = trial {
            let mut state = self.state.lock();
            if state.state == CircuitState::HalfOpen && state.generation == generation {
                state.trial_in_flight = false;
            }
        }
    }

    fn announce(&self, (from, to): Transition) {
        let name = &self.config.name;
        match to {
            CircuitState::Open => warn!(breaker = %name, %from, %to, "circuit breaker opened"),
            CircuitState::HalfOpen | CircuitState::Closed => {
                info!(breaker = %name, %from, %to, "circuit breaker state changed");
            }
        }
        self.hooks.emit(&PatternEvent::CircuitStateChanged {
            name: name.clone(),
            from,
            to,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
#[must_use = "settle the permit with the call outcome"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this permit holds the HalfOpen trial slot
    pub const fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    /// Record a successful call
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// Record a failed call of the given kind
    pub fn record_error(mut self, kind: ErrorKind) {
        self.settled = true;
        self.breaker.on_error(self.trial, kind);
    }

    /// Record whichever outcome `result` holds
    pub fn record<T, E: Classify>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_success(),
            Err(error) => self.record_error(error.kind()),
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.trial);
        }
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("breaker", &self.breaker.config.name)
            .field("trial", &self.trial)
            .finish()
    }
}

/// What to do with a call the breaker rejected
pub trait Fallback<T, E>: Send + Sync {
    /// Produce the call's result in place of running the operation
    fn on_open(&self, rejection: CircuitBreakerOpenError) -> Result<T, E>;
}

/// Surface rejections as [`CircuitBreakerOpenError`] converted into the
/// operation's error type
#[derive(Debug, Clone, Copy, Default)]
pub struct RaiseOpen;

impl<T, E: From<CircuitBreakerOpenError>> Fallback<T, E> for RaiseOpen {
    fn on_open(&self, rejection: CircuitBreakerOpenError) -> Result<T, E> {
        Err(rejection.into())
    }
}

impl<F, T, E> Fallback<T, E> for F
where
    F: Fn(CircuitBreakerOpenError) -> Result<T, E> + Send + Sync,
{
    fn on_open(&self, rejection: CircuitBreakerOpenError) -> Result<T, E> {
        self(rejection)
    }
}

/// Operation guarded by a circuit breaker
pub struct CircuitBreakerCall<Op, Fb = RaiseOpen> {
    inner: Op,
    breaker: Arc<CircuitBreaker>,
    fallback: Fb,
}

/// Guard `operation` with `breaker`
pub fn circuit_breaker<Op>(operation: Op, breaker: Arc<CircuitBreaker>) -> CircuitBreakerCall<Op> {
    CircuitBreakerCall {
        inner: operation,
        breaker,
        fallback: RaiseOpen,
    }
}

impl<Op, Fb> CircuitBreakerCall<Op, Fb> {
    /// Answer rejected calls with `fallback` instead of an error
    #[must_use]
    pub fn with_fallback<F>(self, fallback: F) -> CircuitBreakerCall<Op, F> {
        CircuitBreakerCall {
            inner: self.inner,
            breaker: self.breaker,
            fallback,
        }
    }

    /// The shared breaker
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<Op, Fb> fmt::Debug for CircuitBreakerCall<Op, Fb> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerCall")
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl<Op, Fb> Operation for CircuitBreakerCall<Op, Fb>
where
    Op: Operation,
    Op::Error: Classify,
    Fb: Fallback<Op::Output, Op::Error>,
{
    type Output = Op::Output;
    type Error = Op::Error;

    fn call(&self) -> Result<Self::Output, Self::Error> {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => return self.fallback.on_open(rejection),
        };
        let result = self.inner.call();
        permit.record(&result);
        result
    }
}

impl<Op, Fb> AsyncOperation for CircuitBreakerCall<Op, Fb>
where
    Op: AsyncOperation,
    Op::Error: Classify,
    Fb: Fallback<Op::Output, Op::Error>,
{
    type Output = Op::Output;
    type Error = Op::Error;

    fn call_async(&self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send {
        let span = tracing::debug_span!("circuit_breaker", breaker = %self.breaker.name());
        async move {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(rejection) => return self.fallback.on_open(rejection),
            };
            let result = self.inner.call_async().await;
            permit.record(&result);
            result
        }
        .instrument(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsHook;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        let config = CircuitBreakerConfig::new("jira")
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_secs(10));
        Arc::new(CircuitBreaker::new(config).unwrap())
    }

    fn refused() -> io::Error {
        io::Error::from(io::ErrorKind::ConnectionRefused)
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_opens_and_short_circuits() {
        let calls = AtomicU32::new(0);
        let op = circuit_breaker(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(refused())
            },
            breaker(2),
        );

        assert_eq!(op.call().unwrap_err().kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(op.breaker().state(), CircuitState::Closed);
        assert!(op.call().is_err());
        assert_eq!(op.breaker().state().to_string(), "open");

        let rejected = op.call().unwrap_err();
        let open = rejected
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<CircuitBreakerOpenError>())
            .unwrap();
        assert_eq!(open.name, "jira");
        assert_eq!(open.retry_after, Some(Duration::from_secs(10)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_timestamp() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);
        let first_open = breaker.opened_at().unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        trial.record_error(ErrorKind::Timeout);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker.opened_at().unwrap() - first_open,
            Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_threshold_closes_and_clears_history() {
        let config = CircuitBreakerConfig::new("confluence")
            .with_failure_threshold(2)
            .with_success_threshold(2)
            .with_recovery_timeout(Duration::from_secs(1));
        let breaker = CircuitBreaker::new(config).unwrap();
        for _ in 0..2 {
            breaker.try_acquire().unwrap().record_error(ErrorKind::Unavailable);
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        breaker.try_acquire().unwrap().record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().success_count, 1);

        breaker.try_acquire().unwrap().record_success();
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_failures, 2);
        assert!(breaker.opened_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial_at_a_time() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);
        tokio::time::advance(Duration::from_secs(10)).await;

        let trial = breaker.try_acquire().unwrap();
        let busy = breaker.try_acquire().unwrap_err();
        assert_eq!(busy.state, CircuitState::HalfOpen);
        assert_eq!(busy.retry_after, None);

        // abandoned trial frees the slot
        drop(trial);
        let next = breaker.try_acquire().unwrap();
        assert!(next.is_trial());
        next.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_straggler_failure_during_trial_reopens_and_voids_trial() {
        let breaker = breaker(1);
        let straggler = breaker.try_acquire().unwrap();
        assert!(!straggler.is_trial());
        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);
        let first_open = breaker.opened_at().unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());

        // admitted while closed, finishes while the trial runs
        straggler.record_error(ErrorKind::Unavailable);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker.opened_at().unwrap() - first_open,
            Duration::from_secs(10)
        );

        trial.record_success();
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.total_successes, 1);
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        let retrial = breaker.try_acquire().unwrap();
        assert!(retrial.is_trial());
        retrial.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_ignored_kinds_never_count() {
        let config = CircuitBreakerConfig::new("datadog")
            .with_failure_threshold(1)
            .ignore([ErrorKind::NotFound]);
        let breaker = CircuitBreaker::new(config).unwrap();
        for _ in 0..20 {
            breaker.try_acquire().unwrap().record_error(ErrorKind::NotFound);
        }
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_failures, 0);
    }

    #[test]
    fn test_restricted_failure_kinds() {
        let config = CircuitBreakerConfig::new("llm")
            .with_failure_threshold(1)
            .count_only([ErrorKind::Timeout]);
        assert_eq!(config.verdict(ErrorKind::InvalidInput), Verdict::NotCounted);
        assert_eq!(config.verdict(ErrorKind::Timeout), Verdict::Failure);

        let breaker = CircuitBreaker::new(config).unwrap();
        breaker.try_acquire().unwrap().record_error(ErrorKind::InvalidInput);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().unwrap().record_error(ErrorKind::Timeout);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_decay() {
        let config = CircuitBreakerConfig::new("db")
            .with_failure_threshold(2)
            .with_failure_window(Duration::from_secs(5));
        let breaker = CircuitBreaker::new(config).unwrap();

        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.stats().failure_count, 0);

        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_fallback_absorbs_rejection() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);

        let op = circuit_breaker(|| Ok::<_, io::Error>("live"), breaker)
            .with_fallback(|_rejection: CircuitBreakerOpenError| Ok::<_, io::Error>("cached"));
        assert_eq!(op.call().unwrap(), "cached");
        assert_eq!(op.breaker().stats().total_rejections, 1);
    }

    #[test]
    fn test_reset_and_hooks() {
        let metrics = Arc::new(MetricsHook::new());
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("jira").with_failure_threshold(1))
            .unwrap()
            .with_hooks(ObservabilityHooks::new().with_hook(metrics.clone()));

        breaker.try_acquire().unwrap().record_error(ErrorKind::Connection);
        assert!(breaker.try_acquire().is_err());
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_rejections, 0);
        assert_eq!(metrics.counter("circuit_breaker.jira.state.open"), 1);
        assert_eq!(metrics.counter("circuit_breaker.jira.state.closed"), 1);
        assert_eq!(metrics.counter("circuit_breaker.jira.rejected"), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(CircuitBreaker::new(CircuitBreakerConfig::new("")).is_err());
        assert!(
            CircuitBreaker::new(CircuitBreakerConfig::new("x").with_failure_threshold(0)).is_err()
        );
        assert!(
            CircuitBreaker::new(
                CircuitBreakerConfig::new("x").with_recovery_timeout(Duration::ZERO)
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_async_call_records_outcome() {
        let breaker = breaker(1);
        let op = circuit_breaker(|| async { Err::<(), _>(refused()) }, breaker.clone());

        assert!(op.call_async().await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        let rejected = op.call_async().await.unwrap_err();
        assert_eq!(Classify::kind(&rejected), ErrorKind::CircuitOpen);
    }
}
