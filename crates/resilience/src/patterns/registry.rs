//! Named circuit breakers shared across callers
//!
//! A registry owns exactly one [`CircuitBreaker`] per name. Subsystems that
//! need isolated state (tests, tenants) create their own registry; everything
//! else uses [`CircuitBreakerRegistry::global`].

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerCall, CircuitBreakerConfig, CircuitBreakerStats,
    circuit_breaker,
};
use crate::core::ConfigResult;
use crate::observability::ObservabilityHooks;

static GLOBAL: LazyLock<CircuitBreakerRegistry> = LazyLock::new(CircuitBreakerRegistry::new);

/// Map from breaker name to shared breaker state
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    hooks: ObservabilityHooks,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `hooks` to every breaker this registry creates from now on
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Process-wide default registry
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Breaker for `config.name`, created from `config` on first use
    ///
    /// Creation is atomic per name: concurrent first callers all receive the
    /// same breaker. The first configuration registered under a name wins;
    /// later configurations for that name are ignored.
    pub fn get_or_create(&self, config: CircuitBreakerConfig) -> ConfigResult<Arc<CircuitBreaker>> {
        if let Some(existing) = self.get(&config.name) {
            if existing.config() != &config {
                debug!(breaker = %config.name, "breaker already registered, keeping its config");
            }
            return Ok(existing);
        }

        let breaker = CircuitBreaker::new(config)?.with_hooks(self.hooks.clone());
        let name = breaker.name().to_string();
        let shared = self
            .breakers
            .entry(name)
            .or_insert_with(|| {
                debug!(breaker = %breaker.name(), "circuit breaker registered");
                Arc::new(breaker)
            })
            .clone();
        Ok(shared)
    }

    /// Guard `operation` with the breaker for `config.name`
    pub fn wrap<Op>(
        &self,
        operation: Op,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<CircuitBreakerCall<Op>> {
        Ok(circuit_breaker(operation, self.get_or_create(config)?))
    }

    /// Registered breaker, if any
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    /// Unregister a breaker
    ///
    /// Wrappers that already hold it keep working against the detached
    /// instance.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Reset one breaker; `false` when the name is unknown
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every registered breaker
    pub fn reset_all(&self) {
        // collected first so hooks fired by reset never run under a shard lock
        let breakers: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Stats snapshot for one breaker
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.get(name).map(|breaker| breaker.stats())
    }

    /// Stats snapshots for every registered breaker, keyed by name
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered breakers
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

/// Stats for `name` from the global registry
#[must_use]
pub fn get_circuit_breaker_stats(name: &str) -> Option<CircuitBreakerStats> {
    CircuitBreakerRegistry::global().stats(name)
}

/// Stats for every breaker in the global registry
#[must_use]
pub fn get_all_circuit_breaker_stats() -> BTreeMap<String, CircuitBreakerStats> {
    CircuitBreakerRegistry::global().all_stats()
}
