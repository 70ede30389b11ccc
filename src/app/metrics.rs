//! Prometheus-based metrics module
//!
//! All metrics live in [`REGISTRY`] and are exposed by the control API's
//! `/metrics` endpoint.

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // === Reconciliation ===

    /// Applied configurations, by scope
    pub static ref CONFIG_APPLIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("waypoint_config_applies_total", "Total number of applied configurations"),
        &["scope"]
    ).unwrap();

    /// Time spent in one apply
    pub static ref CONFIG_APPLY_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "waypoint_config_apply_duration_seconds",
            "Time spent applying a configuration"
        ).buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0])
    ).unwrap();

    /// Entries in the live proxy table
    pub static ref PROXIES_LOADED: IntGauge = IntGauge::new(
        "waypoint_proxies_loaded",
        "Number of proxies in the live proxy table"
    ).unwrap();

    /// Entries in the live rule list
    pub static ref RULES_LOADED: IntGauge = IntGauge::new(
        "waypoint_rules_loaded",
        "Number of rules in the live rule list"
    ).unwrap();

    // === Outbound ===

    pub static ref OUTBOUND_DIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("waypoint_outbound_dials_total", "Total dials per adapter"),
        &["adapter"]
    ).unwrap();

    pub static ref OUTBOUND_DIAL_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("waypoint_outbound_dial_failures_total", "Failed dials per adapter"),
        &["adapter"]
    ).unwrap();

    /// Interface address cache flushes
    pub static ref INTERFACE_CACHE_FLUSHES: IntCounter = IntCounter::new(
        "waypoint_interface_cache_flushes_total",
        "Total number of interface cache flushes"
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(CONFIG_APPLIES_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(CONFIG_APPLY_DURATION.clone())).ok();
    REGISTRY.register(Box::new(PROXIES_LOADED.clone())).ok();
    REGISTRY.register(Box::new(RULES_LOADED.clone())).ok();

    REGISTRY.register(Box::new(OUTBOUND_DIALS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(OUTBOUND_DIAL_FAILURES.clone())).ok();

    REGISTRY.register(Box::new(INTERFACE_CACHE_FLUSHES.clone())).ok();
}

/// Tracks one configuration apply
pub struct ApplyMetrics {
    scope: String,
    start_time: Instant,
}

impl ApplyMetrics {
    pub fn start(scope: impl ToString) -> Self {
        Self {
            scope: scope.to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, proxies: usize, rules: usize) {
        CONFIG_APPLIES_TOTAL.with_label_values(&[&self.scope]).inc();
        CONFIG_APPLY_DURATION.observe(self.start_time.elapsed().as_secs_f64());
        PROXIES_LOADED.set(proxies as i64);
        RULES_LOADED.set(rules as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_metrics() {
        init_metrics();
        let before = CONFIG_APPLIES_TOTAL.with_label_values(&["metrics-test"]).get();
        ApplyMetrics::start("metrics-test").record_completion(3, 1);
        assert_eq!(
            CONFIG_APPLIES_TOTAL.with_label_values(&["metrics-test"]).get(),
            before + 1
        );
        assert!(REGISTRY
            .gather()
            .iter()
            .any(|f| f.get_name() == "waypoint_config_applies_total"));
    }
}
