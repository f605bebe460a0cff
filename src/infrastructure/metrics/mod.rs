//! Prometheus Metrics Module
//!
//! Provides gateway-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active session gauge
//! - Dispatches enqueued by event name
//! - Envelopes published by scope kind, and envelopes with no targets
//! - Sessions closed by reason
//! - Heartbeat timeouts

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Identified sessions currently held by the registry
pub static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("sessions_active", "Number of identified gateway sessions")
            .namespace("chat_gateway"),
    )
    .expect("Failed to create SESSIONS_ACTIVE metric")
});

/// Dispatch frames enqueued, by event name
pub static DISPATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dispatches_total", "Dispatch frames enqueued to sessions")
            .namespace("chat_gateway"),
        &["event"],
    )
    .expect("Failed to create DISPATCHES_TOTAL metric")
});

/// Envelopes handed to the router, by scope kind
pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_published_total", "Event envelopes published")
            .namespace("chat_gateway"),
        &["scope"],
    )
    .expect("Failed to create EVENTS_PUBLISHED_TOTAL metric")
});

/// Envelopes that resolved to zero sessions
pub static EVENTS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "events_dropped_total",
            "Event envelopes with no connected recipients",
        )
        .namespace("chat_gateway"),
    )
    .expect("Failed to create EVENTS_DROPPED_TOTAL metric")
});

pub static SESSIONS_CLOSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sessions_closed_total", "Sessions closed by reason").namespace("chat_gateway"),
        &["reason"],
    )
    .expect("Failed to create SESSIONS_CLOSED_TOTAL metric")
});

pub static HEARTBEAT_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "heartbeat_timeouts_total",
            "Sessions closed for missing the heartbeat deadline",
        )
        .namespace("chat_gateway"),
    )
    .expect("Failed to create HEARTBEAT_TIMEOUTS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(SESSIONS_ACTIVE.clone()))
        .expect("Failed to register SESSIONS_ACTIVE");
    registry
        .register(Box::new(DISPATCHES_TOTAL.clone()))
        .expect("Failed to register DISPATCHES_TOTAL");
    registry
        .register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))
        .expect("Failed to register EVENTS_PUBLISHED_TOTAL");
    registry
        .register(Box::new(EVENTS_DROPPED_TOTAL.clone()))
        .expect("Failed to register EVENTS_DROPPED_TOTAL");
    registry
        .register(Box::new(SESSIONS_CLOSED_TOTAL.clone()))
        .expect("Failed to register SESSIONS_CLOSED_TOTAL");
    registry
        .register(Box::new(HEARTBEAT_TIMEOUTS_TOTAL.clone()))
        .expect("Failed to register HEARTBEAT_TIMEOUTS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn set_active_sessions(count: usize) {
    SESSIONS_ACTIVE.set(count as i64);
}

pub fn record_dispatch(event: &str, count: usize) {
    DISPATCHES_TOTAL
        .with_label_values(&[event])
        .inc_by(count as u64);
}

pub fn record_published(scope: &str) {
    EVENTS_PUBLISHED_TOTAL.with_label_values(&[scope]).inc();
}

pub fn record_dropped() {
    EVENTS_DROPPED_TOTAL.inc();
}

pub fn record_session_closed(reason: &str) {
    SESSIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_heartbeat_timeout() {
    HEARTBEAT_TIMEOUTS_TOTAL.inc();
}
