//! The normalized error record

use super::context::{ErrorContext, RequestMeta};
use super::taxonomy::{ErrorCode, ErrorFamily};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One field-level issue attached to an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub metadata: Map<String, Value>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
            value: None,
            expected: None,
            metadata: Map::new(),
        }
    }

    /// Detail about a named field
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_field(field)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Field name of the detail carrying a rate-limit retry hint, in seconds
pub const RETRY_AFTER_FIELD: &str = "retryAfter";

/// Normalized application error
///
/// The HTTP status is never stored: [`AppError::status_code`] derives it from
/// the taxonomy code on every call.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: ErrorCode,
    /// Developer-facing message; may be redacted in place by filters
    pub message: String,
    pub details: Vec<ErrorDetail>,
    timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    /// Captured backtrace, when backtraces are enabled
    pub stack: Option<String>,
    /// Rendered source chain of the original error
    pub cause: Option<String>,
    retryable: bool,
    context: ErrorContext,
}

impl AppError {
    /// Create an error whose retryability follows the taxonomy default
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
            timestamp: Utc::now(),
            request_id: None,
            user_id: None,
            path: None,
            method: None,
            user_agent: None,
            ip: None,
            stack: None,
            cause: None,
            retryable: code.default_retryable(),
            context: ErrorContext::default(),
        }
    }

    /// Catch-all for anything the normalizer could not classify
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    pub fn family(&self) -> ErrorFamily {
        self.code.family()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Override the taxonomy default, e.g. for status-dependent network errors
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach the error context; the request/user fields fall back to it
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        if self.request_id.is_none() {
            self.request_id = context.request_id().map(str::to_string);
        }
        if self.user_id.is_none() {
            self.user_id = context.user_id().map(str::to_string);
        }
        if self.stack.is_none() {
            self.stack = context.stack().map(str::to_string);
        }
        self.context = context;
        self
    }

    /// Copy request metadata onto fields that are still unset
    pub fn with_request(mut self, meta: &RequestMeta) -> Self {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.request_id, &meta.request_id);
        fill(&mut self.user_id, &meta.user_id);
        fill(&mut self.path, &meta.path);
        fill(&mut self.method, &meta.method);
        fill(&mut self.user_agent, &meta.user_agent);
        fill(&mut self.ip, &meta.ip);
        self
    }

    /// Retry hint in seconds from a `retryAfter` detail, if present
    pub fn retry_after(&self) -> Option<u64> {
        self.details
            .iter()
            .filter(|d| d.field.as_deref() == Some(RETRY_AFTER_FIELD))
            .find_map(|d| match &d.value {
                Some(Value::Number(n)) => n.as_u64(),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derived_from_code() {
        let err = AppError::new(ErrorCode::NotFound, "lesson missing");
        assert_eq!(err.status_code(), 404);
        assert!(!err.is_retryable());

        let err = AppError::new(ErrorCode::ServiceUnavailable, "down");
        assert_eq!(err.status_code(), 503);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_with_request_does_not_overwrite() {
        let meta = RequestMeta::new()
            .with_request_id("req-1")
            .with_user_id("u-meta")
            .with_method("POST");
        let mut err = AppError::internal("boom");
        err.user_id = Some("u-explicit".into());

        let err = err.with_request(&meta);
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
        assert_eq!(err.user_id.as_deref(), Some("u-explicit"));
        assert_eq!(err.method.as_deref(), Some("POST"));
    }

    #[test]
    fn test_retry_after_from_detail() {
        let err = AppError::new(ErrorCode::RateLimitExceeded, "slow down")
            .with_detail(ErrorDetail::field(RETRY_AFTER_FIELD, "retry later").with_value(30));
        assert_eq!(err.retry_after(), Some(30));

        let err = AppError::new(ErrorCode::RateLimitExceeded, "slow down");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_context_supplies_missing_identity() {
        let ctx = ErrorContext::builder()
            .user_id("u-ctx")
            .request_id("r-ctx")
            .build();
        let err = AppError::internal("x").with_context(ctx);
        assert_eq!(err.user_id.as_deref(), Some("u-ctx"));
        assert_eq!(err.request_id.as_deref(), Some("r-ctx"));
        assert_eq!(err.context().user_id(), Some("u-ctx"));
    }
}
