//! Manual instrumentation: start a measurement, then `complete()` it

use super::PerformanceMonitor;
use crate::abstractions::time::Instant;
use serde_json::{Map, Value};

/// A running measurement; records one metric when completed
#[must_use = "a measurement records nothing until `complete` is called"]
#[derive(Debug)]
pub struct Measurement<'a> {
    monitor: &'a PerformanceMonitor,
    name: &'static str,
    threshold: f64,
    started: Instant,
    context: Map<String, Value>,
}

impl<'a> Measurement<'a> {
    pub(super) fn start(
        monitor: &'a PerformanceMonitor,
        name: &'static str,
        threshold: f64,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            monitor,
            name,
            threshold,
            started: monitor.clock().now(),
            context,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Stop the clock and record the elapsed milliseconds
    pub fn complete(self) -> f64 {
        let elapsed = self.started.elapsed(self.monitor.clock().now());
        let millis = elapsed.as_secs_f64() * 1000.0;
        self.monitor
            .record_value(self.name, millis, self.threshold, Some(self.context));
        millis
    }
}
