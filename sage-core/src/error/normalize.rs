//! Classification of arbitrary errors into [`AppError`]
//!
//! Walks the source chain of the incoming error and takes the first link it
//! recognizes: an already-normalized `AppError`, a typed `DomainError`, a
//! schema-validation failure, a JSON parse error, an elapsed timeout, an IO
//! error or a core `SageError`. Only when nothing in the chain is recognized
//! does it fall back to sniffing the rendered message.

use super::app_error::AppError;
use super::context::RequestMeta;
use super::conversions::{from_domain, from_elapsed, from_io, from_json, from_sage, validation_details};
use super::domain::DomainError;
use super::sanitize::sanitize_error_message;
use super::taxonomy::ErrorCode;
use super::types::SageError;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use validator::ValidationErrors;

/// Pure error classifier
#[derive(Debug, Clone, Default)]
pub struct ErrorNormalizer {
    sanitize_messages: bool,
    capture_backtrace: bool,
}

impl ErrorNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redact sensitive substrings from messages and causes
    pub fn with_sanitized_messages(mut self, enabled: bool) -> Self {
        self.sanitize_messages = enabled;
        self
    }

    /// Record a backtrace of the normalization boundary (needs `RUST_BACKTRACE`)
    pub fn with_backtraces(mut self, enabled: bool) -> Self {
        self.capture_backtrace = enabled;
        self
    }

    /// Classify `error` and attach request metadata
    pub fn normalize(&self, error: &(dyn Error + 'static), meta: &RequestMeta) -> AppError {
        self.finish(classify(error), meta)
    }

    /// Apply request metadata and redaction to an error that is already normalized
    pub fn normalize_app_error(&self, error: AppError, meta: &RequestMeta) -> AppError {
        self.finish(error, meta)
    }

    /// Classify a panic payload caught at a boundary
    pub fn normalize_panic(&self, payload: &(dyn Any + Send), meta: &RequestMeta) -> AppError {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        self.finish(AppError::internal(format!("panic: {message}")), meta)
    }

    fn finish(&self, mut error: AppError, meta: &RequestMeta) -> AppError {
        if self.sanitize_messages {
            error.message = sanitize_error_message(&error.message);
            error.cause = error.cause.as_deref().map(sanitize_error_message);
        }
        if self.capture_backtrace && error.stack.is_none() {
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                error.stack = Some(backtrace.to_string());
            }
        }
        error.with_request(meta)
    }
}

/// Map an error onto the taxonomy without any request metadata
pub fn classify(error: &(dyn Error + 'static)) -> AppError {
    for link in std::iter::successors(Some(error), |e: &&(dyn Error + 'static)| (*e).source()) {
        if let Some(recognized) = classify_link(link) {
            return match recognized.cause {
                Some(_) => recognized,
                None => match render_sources(link) {
                    Some(cause) => recognized.with_cause(cause),
                    None => recognized,
                },
            };
        }
    }
    sniff(error)
}

fn classify_link(link: &(dyn Error + 'static)) -> Option<AppError> {
    if let Some(app) = link.downcast_ref::<AppError>() {
        return Some(app.clone());
    }
    if let Some(domain) = link.downcast_ref::<DomainError>() {
        return Some(from_domain(domain));
    }
    if let Some(errors) = link.downcast_ref::<ValidationErrors>() {
        return Some(
            AppError::new(ErrorCode::ValidationError, "Validation failed")
                .with_details(validation_details(errors)),
        );
    }
    if let Some(json) = link.downcast_ref::<serde_json::Error>() {
        return Some(from_json(json));
    }
    if let Some(elapsed) = link.downcast_ref::<tokio::time::error::Elapsed>() {
        return Some(from_elapsed(elapsed));
    }
    if let Some(io) = link.downcast_ref::<std::io::Error>() {
        return Some(from_io(io));
    }
    if let Some(sage) = link.downcast_ref::<SageError>() {
        return Some(from_sage(sage));
    }
    None
}

/// Last-resort classification of uncontrolled errors by their message
fn sniff(error: &(dyn Error + 'static)) -> AppError {
    let message = error.to_string();
    let lowered = message.to_lowercase();
    let code = if message.starts_with("SyntaxError") || lowered.contains("syntax error") {
        ErrorCode::InvalidFormat
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        ErrorCode::Timeout
    } else {
        ErrorCode::InternalServerError
    };
    let app = AppError::new(code, message);
    match render_sources(error) {
        Some(cause) => app.with_cause(cause),
        None => app,
    }
}

fn render_sources(error: &(dyn Error + 'static)) -> Option<String> {
    let chain: Vec<String> = std::iter::successors(error.source(), |e: &&(dyn Error + 'static)| (*e).source())
        .map(|e| e.to_string())
        .collect();
    if chain.is_empty() {
        None
    } else {
        Some(chain.join(": "))
    }
}
