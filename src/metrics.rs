//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Authentication Metrics
    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedauth_auth_attempts_total", "Total number of request authentication attempts"),
        &["scheme", "outcome"]
    ).expect("metric can be created");

    // Key Resolution Metrics
    pub static ref KEY_RESOLUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedauth_key_resolutions_total", "Total number of actor key resolutions"),
        &["source", "outcome"]
    ).expect("metric can be created");
    pub static ref REMOTE_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "fedauth_remote_fetch_duration_seconds",
            "Remote key/actor fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        &["outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedauth_errors_total", "Total number of error responses"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(AUTH_ATTEMPTS_TOTAL.clone()))
        .expect("AUTH_ATTEMPTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KEY_RESOLUTIONS_TOTAL.clone()))
        .expect("KEY_RESOLUTIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(REMOTE_FETCH_DURATION_SECONDS.clone()))
        .expect("REMOTE_FETCH_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record one authentication outcome.
pub fn observe_auth(scheme: &str, outcome: &str) {
    AUTH_ATTEMPTS_TOTAL
        .with_label_values(&[scheme, outcome])
        .inc();
}

/// Record one key resolution attempt against `source` ("local" or "remote").
pub fn observe_key_resolution(source: &str, success: bool) {
    let outcome = if success { "hit" } else { "miss" };
    KEY_RESOLUTIONS_TOTAL
        .with_label_values(&[source, outcome])
        .inc();
}

/// Record the duration of one remote fetch stage.
pub fn observe_remote_fetch(success: bool, elapsed: Duration) {
    let outcome = if success { "success" } else { "error" };
    REMOTE_FETCH_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(elapsed.as_secs_f64());
}
