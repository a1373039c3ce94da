//! Prometheus metrics for the orchestration core
//!
//! Registered lazily in the default registry so the hosting process can
//! expose them with `prometheus::gather()`.

use prometheus::{IntCounterVec, IntGaugeVec, Opts};
use std::sync::OnceLock;

/// Metric handles
pub struct Metrics {
    /// Backend REST calls by backend and outcome
    pub backend_calls: IntCounterVec,
    /// Calls currently holding a connection permit, by backend
    pub in_flight: IntGaugeVec,
    /// Compensating actions that failed during rollback; each one is a
    /// potentially leaked remote object that needs manual reconciliation
    pub compensation_failures: IntCounterVec,
}

impl Metrics {
    fn register() -> Self {
        let backend_calls = IntCounterVec::new(
            Opts::new("oceanstor_backend_calls_total", "Backend REST calls by outcome"),
            &["backend", "outcome"],
        )
        .expect("valid backend_calls metric");
        let in_flight = IntGaugeVec::new(
            Opts::new("oceanstor_backend_calls_in_flight", "Backend REST calls in flight"),
            &["backend"],
        )
        .expect("valid in_flight metric");
        let compensation_failures = IntCounterVec::new(
            Opts::new(
                "oceanstor_compensation_failures_total",
                "Compensating actions that failed during rollback",
            ),
            &["operation", "step"],
        )
        .expect("valid compensation_failures metric");

        let registry = prometheus::default_registry();
        let _ = registry.register(Box::new(backend_calls.clone()));
        let _ = registry.register(Box::new(in_flight.clone()));
        let _ = registry.register(Box::new(compensation_failures.clone()));

        Self {
            backend_calls,
            in_flight,
            compensation_failures,
        }
    }
}

/// Global metric handles
pub fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(Metrics::register)
}

pub fn record_call(backend: &str, outcome: &str) {
    metrics()
        .backend_calls
        .with_label_values(&[backend, outcome])
        .inc();
}

pub fn record_compensation_failure(operation: &str, step: &str) {
    metrics()
        .compensation_failures
        .with_label_values(&[operation, step])
        .inc();
}
