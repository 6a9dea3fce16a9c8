//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Stream sessions (starts, rejections, active count, duration)
//! - Helper process exits
//! - Bytes relayed to clients

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Session Metrics
// =============================================================================

/// Sessions whose helper was spawned.
pub static SESSIONS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "magnetstream_sessions_started_total",
        "Total stream sessions whose helper was spawned",
    )
    .unwrap()
});

/// Requests that did not get a helper, by reason.
pub static START_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "magnetstream_session_start_failures_total",
            "Stream requests that failed before streaming",
        ),
        &["reason"], // "not_found", "permission_denied", "spawn_failed", "at_capacity", ...
    )
    .unwrap()
});

/// Sessions with a live helper.
pub static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "magnetstream_sessions_active",
        "Number of stream sessions with a running helper",
    )
    .unwrap()
});

/// Session duration in seconds, by outcome.
pub static SESSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "magnetstream_session_duration_seconds",
            "Time from helper spawn to reap",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0,
        ]),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Helper Process Metrics
// =============================================================================

/// Helper exits by outcome.
pub static HELPER_EXITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("magnetstream_helper_exits_total", "Helper process exits"),
        &["outcome"], // "success", "failed", "terminated"
    )
    .unwrap()
});

/// Bytes read from helpers and handed to response bodies.
pub static BYTES_RELAYED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "magnetstream_bytes_relayed_total",
        "Total bytes relayed from helper stdout",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SESSIONS_STARTED.clone()),
        Box::new(START_FAILURES.clone()),
        Box::new(SESSIONS_ACTIVE.clone()),
        Box::new(SESSION_DURATION.clone()),
        Box::new(HELPER_EXITS.clone()),
        Box::new(BYTES_RELAYED.clone()),
    ]
}
