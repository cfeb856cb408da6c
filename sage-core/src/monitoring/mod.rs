//! Threshold-based performance monitoring
//!
//! Samples arrive from three places: host observations (paint, input,
//! layout, navigation, resources), a periodic memory sampler, and manual
//! [`Measurement`]s. Each sample becomes a [`PerformanceMetric`] in a FIFO
//! buffer; a sample above its threshold is turned into a
//! `PERFORMANCE_DEGRADED` error and handed to the error pipeline.
//!
//! [`PerformanceMonitor::dispose`] disconnects every observer and stops the
//! sampler. Dropping the monitor also stops the sampler.

pub mod observer;
pub mod regression;
pub mod thresholds;
pub mod timing;

pub use observer::{
    MemorySample, NoopObserver, ObservationCategory, ObservationEntry, ObservationHub,
    ObserverHandle, PerformanceObserver, SystemObserver,
};
pub use regression::{Improvement, Regression, RegressionAnalyzer, RegressionReport, Severity};
pub use thresholds::{metric_names, MonitorConfig, PerformanceThresholds};
pub use timing::Measurement;

use crate::abstractions::time::{Clock, SystemClock};
use crate::error::{AppError, ErrorCode, ErrorContext, RequestMeta, SageError, SageResult};
use crate::handler::ErrorCapture;
use crate::metrics::{names, MetricsRegistry};
use crate::session::scope::DiagnosticScope;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

const HISTOGRAM_PREFIX: &str = "perf.";
const COMPONENT: &str = "performance-monitor";

/// One recorded sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<Map<String, Value>>,
}

impl PerformanceMetric {
    pub fn new(name: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            name: name.into(),
            value,
            threshold,
            timestamp: Utc::now(),
            url: String::new(),
            user_id: None,
            session_id: None,
            context: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_breach(&self) -> bool {
        self.value > self.threshold
    }
}

/// Aggregate over every sample of one metric since the monitor started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub breaches: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub generated_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl PerformanceSummary {
    pub fn from_json(text: &str) -> SageResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    observer: Arc<dyn PerformanceObserver>,
    capture: Option<Arc<dyn ErrorCapture>>,
    scope: Arc<DiagnosticScope>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    buffer: Mutex<VecDeque<PerformanceMetric>>,
    breaches: Mutex<HashMap<String, u64>>,
    cumulative_layout_shift: Mutex<f64>,
    current_url: RwLock<String>,
    handles: Mutex<Vec<ObserverHandle>>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("observer", &self.observer)
            .field("buffered", &self.buffer.lock().len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            observer: Arc::new(NoopObserver),
            capture: None,
            scope: Arc::new(DiagnosticScope::new()),
            clock: Arc::new(SystemClock::new()),
            metrics: MetricsRegistry::new(),
            buffer: Mutex::new(VecDeque::new()),
            breaches: Mutex::new(HashMap::new()),
            cumulative_layout_shift: Mutex::new(0.0),
            current_url: RwLock::new(String::new()),
            handles: Mutex::new(Vec::new()),
            sampler: Mutex::new(None),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PerformanceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Where threshold breaches are reported
    pub fn with_capture(mut self, capture: Arc<dyn ErrorCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_scope(mut self, scope: Arc<DiagnosticScope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.config.thresholds
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn set_current_url(&self, url: impl Into<String>) {
        *self.current_url.write() = url.into();
    }

    pub fn is_running(&self) -> bool {
        self.sampler.lock().is_some()
    }

    /// Subscribe to every observation category and start the memory sampler
    ///
    /// Observations and samples hold only a weak reference to the monitor.
    /// The sampler needs a tokio runtime; without one only observers run.
    pub fn start(self: &Arc<Self>) -> SageResult<()> {
        if self.is_running() || !self.handles.lock().is_empty() {
            return Err(SageError::AlreadyRunning {
                component: COMPONENT.to_string(),
            });
        }
        self.config.validate()?;

        let mut handles = Vec::new();
        for category in ObservationCategory::ALL {
            let weak = Arc::downgrade(self);
            let callback = Arc::new(move |entry: ObservationEntry| {
                if let Some(monitor) = weak.upgrade() {
                    monitor.handle_observation(entry);
                }
            });
            match self.observer.observe(category, callback) {
                Some(handle) => handles.push(handle),
                None => debug!(?category, "Observation category not supported by host"),
            }
        }
        let observed = handles.len();
        self.handles.lock().extend(handles);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn(memory_sampler(
                    Arc::downgrade(self),
                    self.config.memory_sample_interval,
                ));
                *self.sampler.lock() = Some(task);
            }
            Err(_) => warn!("No async runtime, memory sampling disabled"),
        }

        info!(
            observed_categories = observed,
            interval = ?self.config.memory_sample_interval,
            "Performance monitor started"
        );
        Ok(())
    }

    /// Disconnect observers and stop the sampler
    pub fn dispose(&self) {
        let handles: Vec<ObserverHandle> = self.handles.lock().drain(..).collect();
        for handle in &handles {
            handle.disconnect();
        }
        if let Some(task) = self.sampler.lock().take() {
            task.abort();
        }
        debug!(observers = handles.len(), "Performance monitor disposed");
    }

    /// Record one sample; returns whether it breached its threshold
    pub fn record_metric(&self, mut metric: PerformanceMetric) -> bool {
        if metric.url.is_empty() {
            metric.url = self.current_url.read().clone();
        }
        if metric.user_id.is_none() {
            metric.user_id = self.scope.user_id();
        }
        if metric.session_id.is_none() {
            metric.session_id = self.scope.session_id();
        }

        self.metrics
            .record_value(&format!("{HISTOGRAM_PREFIX}{}", metric.name), metric.value);
        self.metrics.increment_counter(names::PERFORMANCE_SAMPLES);

        let breach = metric.is_breach();
        if breach {
            *self.breaches.lock().entry(metric.name.clone()).or_insert(0) += 1;
            self.metrics
                .increment_labelled(names::PERFORMANCE_BREACHES, &metric.name);
            self.capture_performance_error(&metric);
        }

        let capacity = self.config.buffer_capacity.max(1);
        let buffered = {
            let mut buffer = self.buffer.lock();
            while buffer.len() >= capacity {
                buffer.pop_front();
            }
            buffer.push_back(metric);
            buffer.len()
        };
        self.metrics.set_gauge(names::BUFFERED_SAMPLES, buffered as f64);
        breach
    }

    /// Record `value` for `name` against an explicit threshold
    pub fn record_value(
        &self,
        name: &str,
        value: f64,
        threshold: f64,
        context: Option<Map<String, Value>>,
    ) -> bool {
        let mut metric = PerformanceMetric::new(name, value, threshold);
        metric.context = context.filter(|c| !c.is_empty());
        self.record_metric(metric)
    }

    /// Record `value` against the configured budget for `name`
    pub fn record_known(&self, name: &str, value: f64) -> bool {
        match self.config.thresholds.for_metric(name) {
            Some(threshold) => self.record_value(name, value, threshold, None),
            None => {
                warn!(metric = name, "No threshold configured, sample dropped");
                false
            }
        }
    }

    fn capture_performance_error(&self, metric: &PerformanceMetric) {
        let message = format!(
            "Performance threshold exceeded: {} = {:.2} (threshold {})",
            metric.name, metric.value, metric.threshold
        );
        let Some(capture) = &self.capture else {
            warn!(metric = %metric.name, value = metric.value, "{}", message);
            return;
        };

        let mut builder = ErrorContext::builder()
            .component(COMPONENT)
            .metadata("metric", metric.name.as_str())
            .metadata("value", metric.value)
            .metadata("threshold", metric.threshold)
            .metadata("url", metric.url.as_str());
        if let Some(context) = &metric.context {
            builder = builder.metadata("measurement", Value::Object(context.clone()));
        }
        if let Some(user) = &metric.user_id {
            builder = builder.user_id(user.as_str());
        }
        if let Some(session) = &metric.session_id {
            builder = builder.session_id(session.as_str());
        }

        let error = AppError::new(ErrorCode::PerformanceDegraded, message)
            .with_context(builder.build());
        let mut meta = RequestMeta::new();
        if !metric.url.is_empty() {
            meta = meta.with_url(metric.url.as_str());
        }
        capture.capture(error, &meta);
    }

    fn handle_observation(&self, entry: ObservationEntry) {
        let t = self.config.thresholds;
        match entry.category {
            ObservationCategory::LargestContentfulPaint => {
                self.record_value(metric_names::LCP, entry.value, t.lcp, None);
            }
            ObservationCategory::FirstInput => {
                self.record_value(metric_names::FID, entry.value, t.fid, None);
            }
            ObservationCategory::LayoutShift => {
                if entry.had_recent_input {
                    return;
                }
                let cls = {
                    let mut total = self.cumulative_layout_shift.lock();
                    *total += entry.value;
                    *total
                };
                self.record_value(metric_names::CLS, cls, t.cls, None);
            }
            ObservationCategory::Navigation => {
                self.record_value(metric_names::PAGE_LOAD, entry.value, t.session_load, None);
            }
            ObservationCategory::Resource => {
                if entry.name.contains("/api/") {
                    let mut context = Map::new();
                    context.insert("resource".into(), Value::String(entry.name));
                    self.record_value(metric_names::API_RESPONSE, entry.value, t.api_response, Some(context));
                }
            }
        }
    }

    /// Take one memory sample now; returns `false` if the host has none
    pub fn sample_memory_now(&self) -> bool {
        let Some(sample) = self.observer.sample_memory() else {
            return false;
        };
        let used = sample.used_bytes as f64;
        self.metrics.set_gauge(names::MEMORY_USED_BYTES, used);
        let t = self.config.thresholds;
        let context = sample
            .total_bytes
            .map(|total| {
                let mut map = Map::new();
                map.insert("totalBytes".into(), json!(total));
                map
            });
        self.record_value(metric_names::MEMORY_USAGE, used, t.memory_usage, context);
        if used > t.memory_leak {
            self.record_value(metric_names::MEMORY_LEAK, used, t.memory_leak, None);
        }
        true
    }

    pub fn measure_session_load(&self, session_id: &str) -> Measurement<'_> {
        Measurement::start(
            self,
            metric_names::SESSION_LOAD,
            self.config.thresholds.session_load,
            context_of("sessionId", session_id),
        )
    }

    pub fn measure_quiz_response(&self, question_id: &str) -> Measurement<'_> {
        Measurement::start(
            self,
            metric_names::QUIZ_RESPONSE,
            self.config.thresholds.quiz_response,
            context_of("questionId", question_id),
        )
    }

    pub fn measure_component_render(&self, component: &str) -> Measurement<'_> {
        Measurement::start(
            self,
            metric_names::COMPONENT_RENDER,
            self.config.thresholds.component_render,
            context_of("component", component),
        )
    }

    pub fn measure_api_call(&self, endpoint: &str) -> Measurement<'_> {
        Measurement::start(
            self,
            metric_names::API_RESPONSE,
            self.config.thresholds.api_response,
            context_of("endpoint", endpoint),
        )
    }

    /// Buffered samples, oldest first
    pub fn get_metrics(&self) -> Vec<PerformanceMetric> {
        self.buffer.lock().iter().cloned().collect()
    }

    pub fn metrics_named(&self, name: &str) -> Vec<PerformanceMetric> {
        self.buffer
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    pub fn clear_metrics(&self) {
        self.buffer.lock().clear();
        self.metrics.set_gauge(names::BUFFERED_SAMPLES, 0.0);
    }

    pub fn summary(&self) -> PerformanceSummary {
        let snapshot = self.metrics.snapshot();
        let breaches = self.breaches.lock().clone();
        let metrics = snapshot
            .histograms
            .into_iter()
            .filter_map(|(key, stats)| {
                let name = key.strip_prefix(HISTOGRAM_PREFIX)?.to_string();
                let summary = MetricSummary {
                    count: stats.count,
                    mean: stats.mean,
                    min: stats.min,
                    max: stats.max,
                    p50: stats.p50,
                    p90: stats.p90,
                    p99: stats.p99,
                    threshold: self.config.thresholds.for_metric(&name),
                    breaches: breaches.get(&name).copied().unwrap_or(0),
                };
                Some((name, summary))
            })
            .collect();
        PerformanceSummary {
            generated_at: Utc::now(),
            metrics,
        }
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.sampler.get_mut().take() {
            task.abort();
        }
    }
}

fn context_of(key: &str, value: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    map
}

async fn memory_sampler(monitor: Weak<PerformanceMonitor>, period: std::time::Duration) {
    let mut ticker = interval(period);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        if !monitor.sample_memory_now() {
            debug!("Host offers no memory samples, stopping sampler");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::time::MockClock;
    use crate::handler::ErrorId;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingCapture {
        errors: Mutex<Vec<AppError>>,
    }

    impl ErrorCapture for RecordingCapture {
        fn capture(&self, error: AppError, _meta: &RequestMeta) -> ErrorId {
            self.errors.lock().push(error);
            ErrorId::new()
        }
    }

    fn monitor() -> (PerformanceMonitor, Arc<RecordingCapture>) {
        let capture = Arc::new(RecordingCapture::default());
        let monitor = PerformanceMonitor::new(MonitorConfig::default()).with_capture(capture.clone());
        (monitor, capture)
    }

    #[test]
    fn test_breach_captures_exactly_once() {
        let (monitor, capture) = monitor();
        assert!(monitor.record_metric(PerformanceMetric::new("LCP", 3000.0, 2500.0)));
        assert!(!monitor.record_metric(PerformanceMetric::new("LCP", 1000.0, 2500.0)));
        assert!(!monitor.record_metric(PerformanceMetric::new("LCP", 2500.0, 2500.0)));

        let errors = capture.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), ErrorCode::PerformanceDegraded);
        let meta = errors[0].context().metadata();
        assert_eq!(meta["metric"], "LCP");
        assert_eq!(meta["value"], 3000.0);
        assert_eq!(meta["threshold"], 2500.0);
    }

    #[test]
    fn test_buffer_is_fifo_capped() {
        let (monitor, _) = monitor();
        for i in 0..105 {
            monitor.record_metric(PerformanceMetric::new("FID", i as f64, 1000.0));
        }
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.len(), 100);
        assert_eq!(metrics[0].value, 5.0);
        assert_eq!(metrics[99].value, 104.0);
    }

    #[test]
    fn test_zero_capacity_keeps_latest_sample() {
        let config = MonitorConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        let metrics = MetricsRegistry::new();
        let monitor = PerformanceMonitor::new(config).with_metrics(metrics.clone());
        monitor.record_metric(PerformanceMetric::new("FID", 10.0, 100.0));
        monitor.record_metric(PerformanceMetric::new("FID", 20.0, 100.0));

        let buffered = monitor.get_metrics();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].value, 20.0);
        assert_eq!(metrics.get_gauge(names::BUFFERED_SAMPLES), 1.0);
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = MonitorConfig {
            memory_sample_interval: Duration::ZERO,
            ..Default::default()
        };
        let monitor = Arc::new(PerformanceMonitor::new(config));
        assert!(matches!(monitor.start(), Err(SageError::ConfigurationError { .. })));
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_long_running_samples_stay_bounded() {
        let metrics = MetricsRegistry::new();
        let (monitor, _) = monitor();
        let monitor = monitor.with_metrics(metrics.clone());
        for i in 0..10_000 {
            monitor.record_metric(PerformanceMetric::new("FID", (i % 50) as f64, 100.0));
        }
        assert_eq!(monitor.get_metrics().len(), 100);
        let summary = monitor.summary();
        assert_eq!(summary.metrics["FID"].count, 10_000);
        assert_eq!(summary.metrics["FID"].max, 49.0);
    }

    #[test]
    fn test_measurement_uses_injected_clock() {
        let clock = Arc::new(MockClock::new());
        let (monitor, capture) = monitor();
        let monitor = monitor.with_clock(clock.clone());

        let m = monitor.measure_quiz_response("q-17");
        clock.advance(Duration::from_millis(250));
        assert_eq!(m.complete(), 250.0);

        let recorded = monitor.metrics_named("quiz_response");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].threshold, 200.0);
        assert_eq!(recorded[0].context.as_ref().unwrap()["questionId"], "q-17");
        assert_eq!(capture.errors.lock().len(), 1);
    }

    #[test]
    fn test_identity_comes_from_scope() {
        let scope = Arc::new(DiagnosticScope::new());
        scope.set_user(Some("u-5".into()));
        scope.set_session(Some("s-5".into()));
        let (monitor, _) = monitor();
        let monitor = monitor.with_scope(scope);
        monitor.set_current_url("https://learn.example.com/quiz");

        monitor.record_known("FID", 20.0);
        let m = &monitor.get_metrics()[0];
        assert_eq!(m.user_id.as_deref(), Some("u-5"));
        assert_eq!(m.session_id.as_deref(), Some("s-5"));
        assert_eq!(m.url, "https://learn.example.com/quiz");
    }

    #[test]
    fn test_observations_are_mapped() {
        let hub = Arc::new(ObservationHub::new());
        let (monitor, capture) = monitor();
        let monitor = Arc::new(monitor.with_observer(hub.clone()));
        monitor.start().unwrap();

        use ObservationCategory::*;
        hub.push(ObservationEntry::new(LargestContentfulPaint, "img", 1800.0));
        hub.push(ObservationEntry::new(LayoutShift, "", 0.06));
        hub.push(ObservationEntry::new(LayoutShift, "", 0.5).with_recent_input(true));
        hub.push(ObservationEntry::new(LayoutShift, "", 0.06));
        hub.push(ObservationEntry::new(Resource, "https://x/static/app.js", 900.0));
        hub.push(ObservationEntry::new(Resource, "https://x/api/lessons", 1200.0));

        let names: Vec<_> = monitor.get_metrics().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["LCP", "CLS", "CLS", "api_response"]);
        let cls = monitor.metrics_named("CLS");
        assert!((cls[1].value - 0.12).abs() < 1e-9);
        // CLS 0.12 and the slow API call both breach
        assert_eq!(capture.errors.lock().len(), 2);

        monitor.dispose();
        assert_eq!(hub.subscriber_count(), 0);
        hub.push(ObservationEntry::new(FirstInput, "click", 500.0));
        assert_eq!(monitor.metrics_named("FID").len(), 0);
    }

    #[test]
    fn test_memory_samples() {
        let hub = Arc::new(ObservationHub::new());
        let (monitor, capture) = monitor();
        let monitor = monitor.with_observer(hub.clone());

        assert!(!monitor.sample_memory_now());

        hub.set_memory(Some(MemorySample {
            used_bytes: 120 * 1024 * 1024,
            total_bytes: None,
        }));
        assert!(monitor.sample_memory_now());
        assert_eq!(
            monitor.metrics.get_gauge(names::MEMORY_USED_BYTES),
            (120 * 1024 * 1024) as f64
        );
        assert_eq!(monitor.metrics_named("memory_usage").len(), 1);
        assert_eq!(monitor.metrics_named("memory_leak").len(), 1);
        assert_eq!(capture.errors.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_dispose_stops_sampler() {
        let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::default()));
        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(matches!(monitor.start(), Err(SageError::AlreadyRunning { .. })));

        monitor.dispose();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_summary_counts_breaches() {
        let (monitor, _) = monitor();
        for v in [100.0, 900.0, 1500.0] {
            monitor.record_known("api_response", v);
        }
        let summary = monitor.summary();
        let api = &summary.metrics["api_response"];
        assert_eq!(api.count, 3);
        assert_eq!(api.breaches, 1);
        assert_eq!(api.threshold, Some(1000.0));
        assert_eq!(api.max, 1500.0);
    }
}
