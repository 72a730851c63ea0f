//! Observability demonstration
//!
//! Drives a flaky Jira client through retry, timeout and a shared breaker
//! while a metrics hook and a logging hook watch the events.
//!
//! Run with `RUST_LOG=debug` to see every scheduled retry.

use agentry_resilience::observability::{LogLevel, LoggingHook, MetricsHook, ObservabilityHooks};
use agentry_resilience::prelude::*;
use agentry_resilience::{get_all_circuit_breaker_stats, retry};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let metrics = Arc::new(MetricsHook::new());
    let hooks = ObservabilityHooks::new()
        .with_hook(metrics.clone())
        .with_hook(Arc::new(LoggingHook::new(LogLevel::Info)));

    let registry = CircuitBreakerRegistry::global();
    let breaker = registry.get_or_create(
        CircuitBreakerConfig::new("jira")
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_millis(200)),
    )?;

    println!("1. A transient failure that recovers on the third attempt\n");

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = (move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 2 {
                Err(io::Error::from(io::ErrorKind::ConnectionReset))
            } else {
                Ok("PROJ-42")
            }
        }
    })
    .with_timeout(TimeoutConfig::new("jira.get_issue", Duration::from_secs(2)))?;
    let flaky = retry(
        flaky,
        RetryConfig::new(4).with_base_delay(Duration::from_millis(20)),
    )?
    .named("jira.get_issue")
    .with_hooks(hooks.clone())
    .with_circuit_breaker(breaker.clone());

    println!("   -> {}\n", flaky.call_async().await?);

    println!("2. A hard outage opens the breaker\n");

    let outage = (|| async { Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused)) })
        .with_circuit_breaker(breaker.clone());
    for _ in 0..3 {
        match outage.call_async().await {
            Ok(()) => println!("   -> ok"),
            Err(error) => println!("   -> {error}"),
        }
    }

    println!("\n3. Breaker statistics\n");
    for (name, stats) in get_all_circuit_breaker_stats() {
        println!(
            "   {name}: {} (failures {}, rejections {})",
            stats.state, stats.total_failures, stats.total_rejections
        );
    }

    println!("\n4. Hook counters\n");
    for (key, value) in metrics.snapshot() {
        println!("   {key} = {value}");
    }

    Ok(())
}
