//! Prometheus metrics for the subscription engine.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::warn;

/// Store operation duration histogram
pub static STORE_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_store_operation_duration_seconds",
            "Subscription store operation duration",
            vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        ),
        &["operation"]
    )
    .expect("Failed to register STORE_OPERATION_DURATION")
});

/// State transitions by kind
pub static TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Proration quotes issued
pub static QUOTES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Usage checks by feature and decision
pub static USAGE_CHECKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment confirmations by outcome
pub static PAYMENT_CONFIRMATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_transitions_total",
                "Subscription state transitions by kind"
            ),
            &["transition"]
        )
        .expect("Failed to register TRANSITIONS_TOTAL")
    });

    QUOTES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("subscription_quotes_total", "Proration quotes issued"),
            &["prorated"]
        )
        .expect("Failed to register QUOTES_TOTAL")
    });

    USAGE_CHECKS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_usage_checks_total",
                "Usage checks by feature and decision"
            ),
            &["feature", "decision"]
        )
        .expect("Failed to register USAGE_CHECKS_TOTAL")
    });

    PAYMENT_CONFIRMATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_payment_confirmations_total",
                "Payment confirmations by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register PAYMENT_CONFIRMATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("subscription_errors_total", "Total errors by code for alerting"),
            &["code"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*STORE_OPERATION_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_transition(transition: &str) {
    if let Some(counter) = TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[transition]).inc();
    }
}

pub fn record_quote(prorated: bool) {
    if let Some(counter) = QUOTES_TOTAL.get() {
        let label = if prorated { "true" } else { "false" };
        counter.with_label_values(&[label]).inc();
    }
}

pub fn record_usage_check(feature: &str, decision: &str) {
    if let Some(counter) = USAGE_CHECKS_TOTAL.get() {
        counter.with_label_values(&[feature, decision]).inc();
    }
}

pub fn record_payment_confirmation(outcome: &str) {
    if let Some(counter) = PAYMENT_CONFIRMATIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(code: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[code]).inc();
    }
}
