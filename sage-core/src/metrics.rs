//! In-process diagnostics metrics
//!
//! Counters for the error pipeline, gauges for last-seen values and value
//! histograms for performance samples. The registry is cheap to clone;
//! clones share storage.
//!
//! A histogram keeps exact running count, sum, min and max, but only the
//! most recent [`HISTOGRAM_WINDOW`] samples for percentiles, so memory stays
//! bounded however long a monitor runs.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Samples retained per histogram for percentile estimates
pub const HISTOGRAM_WINDOW: usize = 1024;

#[derive(Debug, Clone)]
struct Histogram {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
    recent: VecDeque<f64>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            recent: VecDeque::new(),
        }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if self.recent.len() >= HISTOGRAM_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
    }

    fn stats(&self) -> Option<HistogramStats> {
        if self.count == 0 {
            return None;
        }
        let mut sorted: Vec<f64> = self.recent.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let at = |pct: usize| sorted[((n * pct) / 100).min(n - 1)];

        Some(HistogramStats {
            count: self.count,
            mean: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            p50: at(50),
            p90: at(90),
            p99: at(99),
        })
    }
}

/// Metrics registry for collecting diagnostics metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<HashMap<String, u64>>>,
    gauges: Arc<RwLock<HashMap<String, f64>>>,
    histograms: Arc<RwLock<HashMap<String, Histogram>>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by 1
    pub fn increment_counter(&self, name: &str) {
        self.increment_counter_by(name, 1);
    }

    /// Increment a counter by a specific amount
    pub fn increment_counter_by(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Increment `name` and its labelled variant `name{label}`
    pub fn increment_labelled(&self, name: &str, label: &str) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += 1;
        *counters.entry(format!("{name}{{{label}}}")).or_insert(0) += 1;
    }

    /// Set a gauge to a specific value
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    /// Record a value in a histogram
    pub fn record_value(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .record(value);
    }

    /// Get the current value of a counter
    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Get the current value of a gauge
    pub fn get_gauge(&self, name: &str) -> f64 {
        self.gauges.read().get(name).copied().unwrap_or(0.0)
    }

    /// Get histogram statistics
    pub fn get_histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        self.histograms.read().get(name)?.stats()
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.read().clone(),
            gauges: self.gauges.read().clone(),
            histograms: self
                .histograms
                .read()
                .iter()
                .filter_map(|(k, histogram)| histogram.stats().map(|s| (k.clone(), s)))
                .collect(),
        }
    }

    /// Clear all metrics
    pub fn clear(&self) {
        self.counters.write().clear();
        self.gauges.write().clear();
        self.histograms.write().clear();
    }
}

/// Statistics for a histogram
///
/// `count`, `mean`, `min` and `max` cover every sample; the percentiles
/// cover the retained window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// A snapshot of all metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramStats>,
}

/// Metric names used throughout the crate
pub mod names {
    // Error pipeline
    pub const ERRORS_CAPTURED: &str = "errors.captured";
    pub const ERRORS_SUPPRESSED: &str = "errors.suppressed";
    pub const ERRORS_EXPORTED: &str = "errors.exported";

    // Resilience
    pub const RETRY_ATTEMPTS: &str = "retry.attempts";
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";

    // Performance
    pub const PERFORMANCE_SAMPLES: &str = "performance.samples";
    pub const PERFORMANCE_BREACHES: &str = "performance.threshold_breaches";
    pub const MEMORY_USED_BYTES: &str = "performance.memory_used_bytes";
    pub const BUFFERED_SAMPLES: &str = "performance.buffered_samples";

    // Sessions
    pub const SESSIONS_STARTED: &str = "sessions.started";
    pub const SESSIONS_ENDED: &str = "sessions.ended";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_labels() {
        let registry = MetricsRegistry::new();
        registry.increment_labelled(names::ERRORS_CAPTURED, "NOT_FOUND");
        registry.increment_labelled(names::ERRORS_CAPTURED, "TIMEOUT");

        assert_eq!(registry.get_counter(names::ERRORS_CAPTURED), 2);
        assert_eq!(registry.get_counter("errors.captured{NOT_FOUND}"), 1);
    }

    #[test]
    fn test_histogram_stats() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record_value("lcp", v as f64);
        }
        let stats = registry.get_histogram_stats("lcp").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.p50, 51.0);
        assert!((stats.mean - 50.5).abs() < f64::EPSILON);
        assert!(registry.get_histogram_stats("missing").is_none());
    }

    #[test]
    fn test_histogram_memory_is_bounded() {
        let registry = MetricsRegistry::new();
        for v in 0..10_000 {
            registry.record_value("fid", v as f64);
        }
        let stats = registry.get_histogram_stats("fid").unwrap();
        assert_eq!(stats.count, 10_000);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 9999.0);
        assert!((stats.mean - 4999.5).abs() < 1e-9);
        // Percentiles come from the newest samples only
        assert!(stats.p50 >= (10_000 - HISTOGRAM_WINDOW) as f64);

        let histograms = registry.histograms.read();
        assert_eq!(histograms["fid"].recent.len(), HISTOGRAM_WINDOW);
    }

    #[test]
    fn test_gauges_keep_last_value() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.get_gauge(names::MEMORY_USED_BYTES), 0.0);
        registry.set_gauge(names::MEMORY_USED_BYTES, 10.0);
        registry.set_gauge(names::MEMORY_USED_BYTES, 42.0);
        assert_eq!(registry.get_gauge(names::MEMORY_USED_BYTES), 42.0);
        assert_eq!(registry.snapshot().gauges[names::MEMORY_USED_BYTES], 42.0);
    }

    #[test]
    fn test_clones_share_storage() {
        let registry = MetricsRegistry::new();
        let clone = registry.clone();
        clone.increment_counter("x");
        assert_eq!(registry.get_counter("x"), 1);
    }
}
