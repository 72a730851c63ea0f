//! Observability hooks for resilience patterns
//!
//! Every wrapper logs through `tracing` on its own. Hooks are an additional
//! integration point for metrics export or custom alerting: attach an
//! [`ObservabilityHooks`] collection to a wrapper or registry and every
//! [`PatternEvent`] is delivered to each hook in order.

pub mod hooks;

pub use hooks::{
    LogLevel, LoggingHook, MetricsHook, ObservabilityHook, ObservabilityHooks, PatternEvent,
};
