//! Domain-specific capture filters layered on the base [`ErrorFilter`]

use super::{CaptureFilter, ErrorFilter, FilterContext, FilterDecision, SuppressReason};
use crate::error::AppError;
use std::sync::Arc;

/// HTTP/API errors: client mistakes are expected noise
///
/// Suppresses every 4xx except 401/403, and always suppresses 429. The
/// transport status from the context wins over the taxonomy status.
#[derive(Debug, Clone)]
pub struct ApiErrorFilter {
    base: Arc<ErrorFilter>,
}

impl ApiErrorFilter {
    pub fn new(base: Arc<ErrorFilter>) -> Self {
        Self { base }
    }
}

impl CaptureFilter for ApiErrorFilter {
    fn evaluate(&self, error: &mut AppError, ctx: &FilterContext<'_>) -> FilterDecision {
        let status = ctx.http_status.unwrap_or_else(|| error.status_code());
        let expected = status == 429 || ((400..500).contains(&status) && status != 401 && status != 403);
        if expected {
            return FilterDecision::Suppress(SuppressReason::ExpectedStatus);
        }
        self.base.evaluate(error, ctx)
    }
}

/// Messages produced by ordinary sign-in traffic
pub const EXPECTED_AUTH_MESSAGES: &[&str] = &[
    "invalid credentials",
    "invalid email or password",
    "user not found",
    "email already exists",
    "token expired",
    "session expired",
];

/// Authentication errors: routine login failures are not incidents
#[derive(Debug, Clone)]
pub struct AuthErrorFilter {
    base: Arc<ErrorFilter>,
    expected: Vec<String>,
}

impl AuthErrorFilter {
    pub fn new(base: Arc<ErrorFilter>) -> Self {
        Self {
            base,
            expected: EXPECTED_AUTH_MESSAGES.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Replace the list of expected messages (matched case-insensitively)
    pub fn with_expected_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.expected = messages
            .into_iter()
            .map(|m| m.as_ref().to_lowercase())
            .collect();
        self
    }
}

impl CaptureFilter for AuthErrorFilter {
    fn evaluate(&self, error: &mut AppError, ctx: &FilterContext<'_>) -> FilterDecision {
        let message = error.message.to_lowercase();
        if self.expected.iter().any(|m| message.contains(m.as_str())) {
            return FilterDecision::Suppress(SuppressReason::ExpectedAuthFailure);
        }
        self.base.evaluate(error, ctx)
    }
}

/// Learning-domain errors are always captured, but still redacted
#[derive(Debug, Clone)]
pub struct LearningErrorFilter {
    base: Arc<ErrorFilter>,
}

impl LearningErrorFilter {
    pub fn new(base: Arc<ErrorFilter>) -> Self {
        Self { base }
    }
}

impl CaptureFilter for LearningErrorFilter {
    fn evaluate(&self, error: &mut AppError, _ctx: &FilterContext<'_>) -> FilterDecision {
        self.base.redact(error);
        FilterDecision::Capture
    }
}
