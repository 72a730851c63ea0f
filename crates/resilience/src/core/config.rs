//! Configuration traits and serialized policy profiles

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};
use crate::patterns::circuit_breaker::CircuitBreakerConfig;
use crate::patterns::retry::RetryConfig;
use crate::patterns::timeout::TimeoutConfig;

/// Base configuration trait for resilience policies
pub trait ResilienceConfig: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Check every field against its allowed range
    fn validate(&self) -> ConfigResult<()>;

    /// Decode from a JSON value and validate
    fn from_value(value: serde_json::Value) -> ConfigResult<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode as a JSON value
    fn to_value(&self) -> ConfigResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Policies guarding one external dependency
///
/// Every section is optional; a profile with only `timeout` set produces a
/// timeout-only guard. Profiles are usually loaded as a map keyed by
/// dependency name:
///
/// ```
/// use agentry_resilience::ResilienceProfile;
///
/// let profiles = ResilienceProfile::map_from_json(r#"{
///     "jira": {
///         "retry": { "max_attempts": 4, "jitter": false },
///         "circuit_breaker": { "name": "jira", "failure_threshold": 3 }
///     },
///     "datadog": {
///         "timeout": { "operation_name": "datadog.query" }
///     }
/// }"#)
/// .unwrap();
///
/// assert_eq!(profiles["jira"].retry.as_ref().unwrap().max_attempts, 4);
/// assert!(profiles["datadog"].circuit_breaker.is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceProfile {
    /// Retry section
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Circuit breaker section
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Timeout section
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConfig>,
}

impl ResilienceProfile {
    /// Decode one profile from JSON and validate every section
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Decode a map of named profiles from JSON and validate each one
    pub fn map_from_json(json: &str) -> ConfigResult<BTreeMap<String, Self>> {
        let profiles: BTreeMap<String, Self> = serde_json::from_str(json)?;
        for (name, profile) in &profiles {
            profile.validate().inspect_err(|error| {
                tracing::warn!(profile = %name, %error, "rejected resilience profile");
            })?;
        }
        Ok(profiles)
    }

    /// Whether no section is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retry.is_none() && self.circuit_breaker.is_none() && self.timeout.is_none()
    }
}

impl ResilienceConfig for ResilienceProfile {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(timeout) = &self.timeout {
            timeout.validate()?;
        }
        Ok(())
    }
}

pub(crate) fn ensure(condition: bool, field: &'static str, message: &str) -> ConfigResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::validation(field, message))
    }
}
