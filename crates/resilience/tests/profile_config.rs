//! Loading resilience profiles from configuration

use agentry_resilience::prelude::*;
use agentry_resilience::{ConfigError, ResilienceProfile};
use std::io;
use std::time::Duration;

const PROFILES: &str = r#"{
    "jira": {
        "retry": {
            "max_attempts": 4,
            "strategy": "linear",
            "jitter": false,
            "retry_on": ["rate_limited", "unavailable"]
        },
        "circuit_breaker": {
            "name": "jira",
            "failure_threshold": 3,
            "ignored_kinds": ["not_found"]
        }
    },
    "llm": {
        "circuit_breaker": {
            "name": "llm",
            "failure_kinds": ["timeout", "unavailable"]
        }
    }
}"#;

#[test]
fn test_profiles_decode_with_defaults() {
    let profiles = ResilienceProfile::map_from_json(PROFILES).unwrap();
    assert_eq!(profiles.len(), 2);

    let jira = &profiles["jira"];
    let retry = jira.retry.as_ref().unwrap();
    assert_eq!(retry.max_attempts, 4);
    assert_eq!(retry.strategy, BackoffStrategy::Linear);
    assert!(retry.retry_on.as_ref().unwrap().contains(&ErrorKind::RateLimited));
    assert!(jira.timeout.is_none());

    let breaker = jira.circuit_breaker.as_ref().unwrap();
    assert_eq!(breaker.failure_threshold, 3);
    assert_eq!(breaker.success_threshold, 1);
    assert!(breaker.ignored_kinds.contains(&ErrorKind::NotFound));

    let llm = profiles["llm"].circuit_breaker.as_ref().unwrap();
    assert_eq!(llm.failure_threshold, 5);
    assert!(llm.failure_kinds.as_ref().unwrap().contains(&ErrorKind::Timeout));
}

#[test]
fn test_profile_drives_wrappers() {
    let profiles = ResilienceProfile::map_from_json(PROFILES).unwrap();
    let jira = profiles["jira"].clone();
    let registry = CircuitBreakerRegistry::new();

    let guarded = registry
        .wrap(
            || Err::<(), _>(io::Error::from(io::ErrorKind::NotFound)),
            jira.circuit_breaker.unwrap(),
        )
        .unwrap()
        .with_retry(jira.retry.unwrap())
        .unwrap();

    for _ in 0..5 {
        assert_eq!(guarded.call().unwrap_err().kind(), io::ErrorKind::NotFound);
    }
    assert_eq!(registry.stats("jira").unwrap().state, CircuitState::Closed);
}

#[test]
fn test_validation_names_the_field() {
    let error = ResilienceProfile::from_json(
        r#"{ "circuit_breaker": { "name": "db", "success_threshold": 0 } }"#,
    )
    .unwrap_err();
    match error {
        ConfigError::Validation { field, .. } => assert_eq!(field, "success_threshold"),
        other => panic!("unexpected error: {other}"),
    }

    let error = ResilienceProfile::map_from_json(r#"{ "x": { "timeout": { "operation_name": "" } } }"#)
        .unwrap_err();
    assert!(error.to_string().contains("operation_name"));
}

#[test]
fn test_malformed_json_is_a_decode_error() {
    let error = ResilienceProfile::from_json(r#"{ "retry": { "strategy": "fibonacci" } }"#)
        .unwrap_err();
    assert!(matches!(error, ConfigError::Decode(_)));
}

#[cfg(not(feature = "humantime"))]
#[test]
fn test_durations_use_serde_default_format() {
    let profile = ResilienceProfile::from_json(
        r#"{ "timeout": { "operation_name": "db", "timeout": { "secs": 2, "nanos": 500000000 } } }"#,
    )
    .unwrap();
    assert_eq!(
        profile.timeout.unwrap().timeout,
        Duration::from_millis(2500)
    );
}

#[cfg(feature = "humantime")]
#[test]
fn test_durations_accept_human_readable_strings() {
    let profile = ResilienceProfile::from_json(
        r#"{
            "retry": { "base_delay": "250ms", "max_delay": "10s" },
            "timeout": { "operation_name": "db", "timeout": "2s 500ms" }
        }"#,
    )
    .unwrap();
    let retry = profile.retry.unwrap();
    assert_eq!(retry.base_delay, Duration::from_millis(250));
    assert_eq!(retry.max_delay, Duration::from_secs(10));
    assert_eq!(
        profile.timeout.unwrap().timeout,
        Duration::from_millis(2500)
    );
}

#[test]
fn test_profile_serializes_back() {
    let profile = ResilienceProfile {
        timeout: Some(TimeoutConfig::new("llm.completion", Duration::from_secs(20))),
        ..ResilienceProfile::default()
    };
    let value = serde_json::to_value(&profile).unwrap();
    assert!(value.get("retry").is_none());
    assert_eq!(value["timeout"]["operation_name"], "llm.completion");
}
