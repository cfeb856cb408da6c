//! Error handler: the single normalization boundary
//!
//! `handle_*` never fails. Each call normalizes the error, enriches it from
//! the diagnostic scope, asks the capture filter, and then (for admitted
//! errors only) logs it and hands server errors to the exporter. A response
//! is built either way.

pub mod exporter;
pub mod response;

pub use exporter::{
    ChannelExporter, DiagnosticsExporter, ExportEvent, ExportedError, NoopExporter,
    TracingExporter,
};
pub use response::{ErrorBody, ErrorEnvelope, ErrorResponse};

use crate::config::Environment;
use crate::error::{AppError, ErrorCode, ErrorNormalizer, RequestMeta};
use crate::filter::{CaptureFilter, FilterContext, FilterDecision};
use crate::metrics::{names, MetricsRegistry};
use crate::observability;
use crate::session::scope::{DiagnosticScope, ATTACHED_BREADCRUMBS};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{trace, Instrument, Level};
use uuid::Uuid;

pub const DEFAULT_SERVICE_NAME: &str = "sage";

/// Opaque identifier of one handled error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorId(Uuid);

impl ErrorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ErrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Handler behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Put the captured stack in responses
    pub include_stack: bool,
    /// Put raw messages and server-side details in responses
    pub include_sensitive_info: bool,
    pub log_errors: bool,
    /// Report admitted server errors to the exporter
    pub notify_external: bool,
    pub sanitize_error_messages: bool,
}

impl HandlerConfig {
    pub fn development() -> Self {
        Self {
            include_stack: true,
            include_sensitive_info: true,
            log_errors: true,
            notify_external: false,
            sanitize_error_messages: false,
        }
    }

    pub fn production() -> Self {
        Self {
            include_stack: false,
            include_sensitive_info: false,
            log_errors: true,
            notify_external: true,
            sanitize_error_messages: true,
        }
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => Self::development(),
            Environment::Production => Self::production(),
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Entry point for components that report errors they did not receive
/// through a request, such as performance breaches and session errors
pub trait ErrorCapture: Send + Sync {
    fn capture(&self, error: AppError, meta: &RequestMeta) -> ErrorId;
}

pub struct ErrorHandler {
    config: HandlerConfig,
    service_name: String,
    normalizer: ErrorNormalizer,
    filter: Arc<dyn CaptureFilter>,
    exporter: Arc<dyn exporter::DiagnosticsExporter>,
    scope: Arc<DiagnosticScope>,
    metrics: MetricsRegistry,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("config", &self.config)
            .field("service_name", &self.service_name)
            .field("filter", &self.filter)
            .field("exporter", &self.exporter)
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    pub fn new(config: HandlerConfig, filter: Arc<dyn CaptureFilter>) -> Self {
        let normalizer = ErrorNormalizer::new()
            .with_sanitized_messages(config.sanitize_error_messages)
            .with_backtraces(config.include_stack);
        Self {
            config,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            normalizer,
            filter,
            exporter: Arc::new(NoopExporter),
            scope: Arc::new(DiagnosticScope::new()),
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn exporter::DiagnosticsExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_scope(mut self, scope: Arc<DiagnosticScope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn scope(&self) -> &Arc<DiagnosticScope> {
        &self.scope
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Normalize any error and build its response
    pub fn handle_error(&self, error: &(dyn Error + 'static), meta: &RequestMeta) -> ErrorResponse {
        let normalized = self.normalizer.normalize(error, meta);
        self.process(normalized, meta, None)
    }

    pub fn handle_app_error(&self, error: AppError, meta: &RequestMeta) -> ErrorResponse {
        let normalized = self.normalizer.normalize_app_error(error, meta);
        self.process(normalized, meta, None)
    }

    /// Like [`handle_app_error`](Self::handle_app_error), for a transport
    /// status that differs from the taxonomy one (e.g. an upstream 429)
    pub fn handle_with_status(&self, error: AppError, meta: &RequestMeta, status: u16) -> ErrorResponse {
        let normalized = self.normalizer.normalize_app_error(error, meta);
        self.process(normalized, meta, Some(status))
    }

    pub fn handle_panic(&self, payload: &(dyn Any + Send), meta: &RequestMeta) -> ErrorResponse {
        let normalized = self.normalizer.normalize_panic(payload, meta);
        self.process(normalized, meta, None)
    }

    /// Await `future`, turning an error or a panic into a response
    pub async fn wrap<F, T, E>(&self, meta: &RequestMeta, future: F) -> Result<T, ErrorResponse>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        let span = observability::request_span(
            meta.method.as_deref().unwrap_or("-"),
            meta.path.as_deref().unwrap_or("-"),
            meta.request_id.as_deref(),
        );
        let outcome = AssertUnwindSafe(future)
            .catch_unwind()
            .instrument(span.clone())
            .await;
        span.in_scope(|| {
            let response = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => self.handle_app_error(e.into(), meta),
                Err(payload) => self.handle_panic(payload.as_ref(), meta),
            };
            observability::record_response(response.status.as_u16(), response.error_id);
            Err(response)
        })
    }

    fn process(&self, error: AppError, meta: &RequestMeta, http_status: Option<u16>) -> ErrorResponse {
        let mut error = self.enrich(error);
        let error_id = ErrorId::new();

        let mut ctx = FilterContext::from_request(meta);
        ctx.http_status = http_status;
        let decision = self.filter.evaluate(&mut error, &ctx);

        match decision {
            FilterDecision::Capture => {
                self.metrics
                    .increment_labelled(names::ERRORS_CAPTURED, error.code().as_str());
                if self.config.log_errors {
                    log_error(&error, error_id);
                }
                if self.config.notify_external && error.status_code() >= 500 {
                    let event = ExportEvent::from_error(&self.service_name, error_id, &error)
                        .with_tags(self.scope.tags());
                    exporter::dispatch(&self.exporter, event, &self.metrics);
                }
            }
            FilterDecision::Suppress(reason) => {
                self.metrics
                    .increment_labelled(names::ERRORS_SUPPRESSED, reason.as_str());
                trace!(error_id = %error_id, reason = reason.as_str(), "Skipping log and export");
            }
        }

        self.build_response(&error, error_id, decision.is_capture())
    }

    /// Derive a context carrying the ambient scope
    fn enrich(&self, error: AppError) -> AppError {
        let snapshot = self.scope.snapshot();
        let breadcrumbs = self.scope.recent_breadcrumbs(ATTACHED_BREADCRUMBS);

        let mut extra = Map::new();
        if !snapshot.tags.is_empty() {
            extra.insert("tags".into(), serde_json::to_value(&snapshot.tags).unwrap_or(Value::Null));
        }
        if !snapshot.contexts.is_empty() {
            extra.insert(
                "contexts".into(),
                serde_json::to_value(&snapshot.contexts).unwrap_or(Value::Null),
            );
        }
        if !breadcrumbs.is_empty() {
            extra.insert(
                "breadcrumbs".into(),
                serde_json::to_value(&breadcrumbs).unwrap_or(Value::Null),
            );
        }

        let context = error
            .context()
            .to_builder()
            .fill_identity(
                error.user_id.as_deref().or(snapshot.user_id.as_deref()),
                snapshot.session_id.as_deref(),
                error.request_id.as_deref(),
            )
            .extend_metadata(extra)
            .build();
        error.with_context(context)
    }

    fn build_response(&self, error: &AppError, error_id: ErrorId, captured: bool) -> ErrorResponse {
        let status = error.status_code();
        let message = if self.config.include_sensitive_info {
            error.message.clone()
        } else {
            error.code().user_message().to_string()
        };
        let details = (!error.details.is_empty()
            && (status < 500 || self.config.include_sensitive_info))
            .then(|| error.details.clone());
        let stack = if self.config.include_stack {
            error.stack.clone()
        } else {
            None
        };

        let body = ErrorEnvelope::new(ErrorBody {
            code: error.code(),
            message,
            timestamp: error.timestamp(),
            details,
            request_id: error.request_id.clone(),
            stack,
        });
        let response = ErrorResponse::new(status, body, error_id, captured);
        match error.retry_after() {
            Some(seconds) if error.code() == ErrorCode::RateLimitExceeded => {
                response.with_retry_after(seconds)
            }
            _ => response,
        }
    }
}

impl ErrorCapture for ErrorHandler {
    fn capture(&self, error: AppError, meta: &RequestMeta) -> ErrorId {
        self.handle_app_error(error, meta).error_id
    }
}

macro_rules! emit_app_error {
    ($level:expr, $prefix:literal, $error:expr, $error_id:expr) => {{
        let error: &AppError = $error;
        let details = serde_json::to_string(&error.details).unwrap_or_default();
        tracing::event!(
            $level,
            error_id = %$error_id,
            code = %error.code(),
            status_code = error.status_code(),
            timestamp = %error.timestamp().to_rfc3339(),
            request_id = error.request_id.as_deref().unwrap_or(""),
            user_id = error.user_id.as_deref().unwrap_or(""),
            path = error.path.as_deref().unwrap_or(""),
            method = error.method.as_deref().unwrap_or(""),
            user_agent = error.user_agent.as_deref().unwrap_or(""),
            ip = error.ip.as_deref().unwrap_or(""),
            details = %details,
            stack = error.stack.as_deref().unwrap_or(""),
            "{} {}",
            $prefix,
            error.message
        );
    }};
}

fn log_error(error: &AppError, error_id: ErrorId) {
    if error.status_code() >= 500 {
        emit_app_error!(Level::ERROR, "[ERROR]", error, error_id);
    } else {
        emit_app_error!(Level::WARN, "[WARN]", error, error_id);
    }
}
