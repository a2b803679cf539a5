//! Prometheus metrics for resource checking.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

/// Registry for all scanner metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static CHECKS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lookout_checks_started_total",
        "Total number of resource checks started",
    )
    .expect("metric creation failed")
});

pub static CHECKS_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "lookout_checks_failed_total",
            "Total number of resource checks that failed, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static LOCK_CONTENTION: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lookout_checking_lock_contention_total",
        "Total number of checking lease probes that found the lease taken",
    )
    .expect("metric creation failed")
});

pub static VERSIONS_SAVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lookout_versions_saved_total",
        "Total number of discovered versions handed to the version repository",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with [`REGISTRY`]. Idempotent.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CHECKS_STARTED.clone()))
            .expect("failed to register CHECKS_STARTED");
        REGISTRY
            .register(Box::new(CHECKS_FAILED.clone()))
            .expect("failed to register CHECKS_FAILED");
        REGISTRY
            .register(Box::new(LOCK_CONTENTION.clone()))
            .expect("failed to register LOCK_CONTENTION");
        REGISTRY
            .register(Box::new(VERSIONS_SAVED.clone()))
            .expect("failed to register VERSIONS_SAVED");
    });
}

pub fn record_check_failure(kind: &str) {
    CHECKS_FAILED.with_label_values(&[kind]).inc();
}
