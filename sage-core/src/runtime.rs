//! Wiring of the diagnostics components around one shared scope
//!
//! The handler is the capture sink for both the performance monitor and the
//! session manager, so everything they report goes through the same filter,
//! rate limiter, logging and export path.

use crate::abstractions::time::{Clock, SystemClock};
use crate::config::SageConfig;
use crate::error::SageResult;
use crate::filter::{ApiErrorFilter, AuthErrorFilter, CaptureFilter, ErrorFilter, LearningErrorFilter};
use crate::handler::{DiagnosticsExporter, ErrorCapture, ErrorHandler};
use crate::metrics::MetricsRegistry;
use crate::monitoring::observer::{PerformanceObserver, SystemObserver};
use crate::monitoring::PerformanceMonitor;
use crate::patterns::{RetryConfig, RetryExecutor};
use crate::session::{DiagnosticScope, LearningSessionManager};
use std::sync::Arc;
use tracing::info;

/// Which preset filter the handler should apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterProfile {
    #[default]
    Api,
    Auth,
    Learning,
}

#[derive(Debug)]
pub struct DiagnosticsRuntime {
    config: SageConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    scope: Arc<DiagnosticScope>,
    filter: Arc<ErrorFilter>,
    handler: Arc<ErrorHandler>,
    retry: RetryExecutor,
    monitor: Arc<PerformanceMonitor>,
    sessions: Arc<LearningSessionManager>,
}

pub struct RuntimeBuilder {
    config: SageConfig,
    clock: Arc<dyn Clock>,
    exporter: Option<Arc<dyn DiagnosticsExporter>>,
    observer: Option<Arc<dyn PerformanceObserver>>,
    profile: FilterProfile,
}

impl RuntimeBuilder {
    pub fn new(config: SageConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock::new()),
            exporter: None,
            observer: None,
            profile: FilterProfile::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn DiagnosticsExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PerformanceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn filter_profile(mut self, profile: FilterProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn build(self) -> SageResult<DiagnosticsRuntime> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock;
        let metrics = MetricsRegistry::new();
        let scope = Arc::new(DiagnosticScope::with_capacity(
            config.session.breadcrumb_capacity,
        ));

        let filter = Arc::new(ErrorFilter::new(config.filter.clone(), clock.clone())?);
        let capture_filter: Arc<dyn CaptureFilter> = match self.profile {
            FilterProfile::Api => Arc::new(ApiErrorFilter::new(filter.clone())),
            FilterProfile::Auth => Arc::new(AuthErrorFilter::new(filter.clone())),
            FilterProfile::Learning => Arc::new(LearningErrorFilter::new(filter.clone())),
        };

        let mut handler = ErrorHandler::new(config.handler_config(), capture_filter)
            .with_service_name(config.observability.service_name.clone())
            .with_scope(scope.clone())
            .with_metrics(metrics.clone());
        if let Some(exporter) = self.exporter {
            handler = handler.with_exporter(exporter);
        }
        let handler = Arc::new(handler);
        let capture: Arc<dyn ErrorCapture> = handler.clone();

        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(SystemObserver::new()));
        let monitor = Arc::new(
            PerformanceMonitor::new(config.monitor.clone())
                .with_observer(observer)
                .with_capture(capture.clone())
                .with_scope(scope.clone())
                .with_clock(clock.clone())
                .with_metrics(metrics.clone()),
        );

        let sessions = Arc::new(
            LearningSessionManager::new(config.session.clone(), scope.clone())
                .with_capture(capture)
                .with_clock(clock.clone())
                .with_metrics(metrics.clone()),
        );

        let retry = RetryExecutor::new(clock.clone())
            .with_metrics(metrics.clone())
            .with_defaults(config.retry.clone());

        Ok(DiagnosticsRuntime {
            config,
            clock,
            metrics,
            scope,
            filter,
            handler,
            retry,
            monitor,
            sessions,
        })
    }
}

impl DiagnosticsRuntime {
    pub fn new(config: SageConfig) -> SageResult<Self> {
        RuntimeBuilder::new(config).build()
    }

    pub fn builder(config: SageConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &SageConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn scope(&self) -> &Arc<DiagnosticScope> {
        &self.scope
    }

    /// The shared base filter, for building additional preset filters
    pub fn filter(&self) -> &Arc<ErrorFilter> {
        &self.filter
    }

    pub fn handler(&self) -> &Arc<ErrorHandler> {
        &self.handler
    }

    /// Executor carrying the configured `[retry]` policy as its default
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn retry_config(&self) -> &RetryConfig {
        self.retry.defaults()
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn sessions(&self) -> &Arc<LearningSessionManager> {
        &self.sessions
    }

    /// Start the performance monitor's observers and memory sampler
    pub fn start(&self) -> SageResult<()> {
        self.monitor.start()?;
        info!(
            environment = self.config.environment.as_str(),
            service = %self.config.observability.service_name,
            "Diagnostics runtime started"
        );
        Ok(())
    }

    /// Stop background work and end any open session
    pub fn dispose(&self) {
        if let Some(stats) = self.sessions.end_session() {
            info!(session_id = %stats.session_id, "Ended open session during shutdown");
        }
        self.monitor.dispose();
        info!("Diagnostics runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::time::MockClock;
    use crate::error::{AppError, ErrorCode, RequestMeta};
    use crate::metrics::names;
    use crate::monitoring::observer::NoopObserver;
    use crate::session::LearningContext;
    use serde_json::Map;
    use std::time::Duration;

    fn runtime() -> DiagnosticsRuntime {
        DiagnosticsRuntime::builder(SageConfig::default())
            .clock(Arc::new(MockClock::new()))
            .observer(Arc::new(NoopObserver))
            .build()
            .unwrap()
    }

    #[test]
    fn test_components_share_scope_and_metrics() {
        let rt = runtime();
        rt.sessions()
            .set_context(LearningContext::new("learner-1", "session-1"));

        let response = rt.handler().handle_app_error(
            AppError::new(ErrorCode::AiServiceError, "model timed out"),
            &RequestMeta::new(),
        );
        assert!(response.captured);
        assert_eq!(rt.metrics().get_counter(names::SESSIONS_STARTED), 1);
        assert_eq!(
            rt.metrics()
                .get_counter(&format!("{}{{AI_SERVICE_ERROR}}", names::ERRORS_CAPTURED)),
            1
        );
    }

    #[test]
    fn test_breach_flows_through_handler() {
        let rt = runtime();
        assert!(rt.monitor().record_known("api_response", 900.0));
        assert_eq!(rt.metrics().get_counter(names::ERRORS_CAPTURED), 1);
    }

    #[tokio::test]
    async fn test_configured_retry_policy_is_used() {
        let clock = Arc::new(MockClock::new());
        let mut config = SageConfig::default();
        config.retry.max_attempts = 4;
        config.retry.base_delay = Duration::from_millis(100);
        let rt = DiagnosticsRuntime::builder(config)
            .clock(clock.clone())
            .observer(Arc::new(NoopObserver))
            .build()
            .unwrap();
        assert_eq!(rt.retry_config().max_attempts, 4);

        let result: Result<(), AppError> = rt
            .retry()
            .run_default("sync_progress", || async {
                Err(AppError::new(ErrorCode::NetworkError, "reset"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(clock.sleeps().len(), 3);
        assert_eq!(clock.sleeps()[0], Duration::from_millis(100));
        assert_eq!(rt.metrics().get_counter("retry.attempts{sync_progress}"), 3);
    }

    #[test]
    fn test_session_errors_use_handler() {
        let rt = runtime();
        rt.sessions().set_context(LearningContext::new("u", "s"));
        let id = rt
            .sessions()
            .capture_error(AppError::internal("grading failed"), Map::new());
        assert!(id.is_some());
        assert_eq!(rt.metrics().get_counter(names::ERRORS_CAPTURED), 1);

        rt.dispose();
        assert!(!rt.sessions().is_active());
    }
}
