//! Tracing setup and span helpers
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary (or a test) through [`init_tracing`].

use crate::config::{LogFormat, ObservabilityConfig};
use crate::error::{SageError, SageResult};
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) -> SageResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.log_level)?,
    };

    let registry = Registry::default().with(env_filter);
    let result = match config.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init(),
    };

    result.map_err(|_| SageError::AlreadyRunning {
        component: "tracing subscriber".to_string(),
    })
}

fn default_filter(level: &str) -> SageResult<EnvFilter> {
    EnvFilter::try_new(format!("sage_core={level},sage={level}"))
        .map_err(|e| SageError::configuration("observability", format!("invalid log level: {e}")))
}

/// Span for one request passing through the error handler
#[inline]
pub fn request_span(method: &str, path: &str, request_id: Option<&str>) -> Span {
    tracing::info_span!(
        "request",
        method = %method,
        path = %path,
        request_id = request_id,
        status = tracing::field::Empty,
        error_id = tracing::field::Empty,
    )
}

/// Span covering a learning session
#[inline]
pub fn session_span(user_id: &str, session_id: &str) -> Span {
    tracing::info_span!(
        "learning_session",
        user_id = %user_id,
        session_id = %session_id,
        module_id = tracing::field::Empty,
    )
}

/// Record the outcome of a handled request in the current span
pub fn record_response(status: u16, error_id: impl std::fmt::Display) {
    let span = Span::current();
    span.record("status", status);
    span.record("error_id", tracing::field::display(error_id));
}
