//! Capture filtering: decides whether a normalized error is worth reporting
//!
//! The base [`ErrorFilter`] runs, in order and stopping at the first "no":
//!
//! 1. rate/dedup check ([`ErrorRateLimiter`])
//! 2. ignored-message match against message and stack
//! 3. URL deny-list
//! 4. URL allow-list (only when non-empty)
//! 5. localhost suppression
//! 6. bot user-agent suppression
//!
//! Admitted errors have their message and stack redacted in place with the
//! configured sensitive-data patterns. Suppression only withholds an error
//! from diagnostics; the caller still answers the request normally.

pub mod presets;
pub mod rate_limiter;

pub use presets::{ApiErrorFilter, AuthErrorFilter, LearningErrorFilter};
pub use rate_limiter::{similarity_key, ErrorRateLimiter, RateDecision};

use crate::abstractions::time::Clock;
use crate::error::{AppError, RequestMeta, SageError, SageResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::trace;

static BOT_USER_AGENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)bot|crawler|spider|crawling|slurp|headless|lighthouse|pingdom")
        .expect("bot pattern is valid")
});

const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "0.0.0.0"];

/// Replacement for matches of `sensitive_data_patterns`
pub const FILTERED: &str = "[FILTERED]";

/// A message-ignore rule: plain substring or regular expression
///
/// In TOML either `"ResizeObserver loop"` or `{ regex = "^Script error" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPattern {
    Text(String),
    Regex { regex: String },
}

impl ErrorPattern {
    pub fn text(s: impl Into<String>) -> Self {
        ErrorPattern::Text(s.into())
    }

    pub fn regex(s: impl Into<String>) -> Self {
        ErrorPattern::Regex { regex: s.into() }
    }
}

/// Filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFilterConfig {
    pub ignore_errors: Vec<ErrorPattern>,
    /// Regexes matched against the request URL
    pub deny_urls: Vec<String>,
    /// Regexes; when non-empty, URLs matching none of them are suppressed
    pub allow_urls: Vec<String>,
    pub ignore_bots: bool,
    pub ignore_localhost: bool,
    pub max_errors_per_minute: u32,
    pub max_similar_errors: u32,
    pub sensitive_data_patterns: Vec<String>,
}

impl Default for ErrorFilterConfig {
    fn default() -> Self {
        Self {
            ignore_errors: vec![
                ErrorPattern::text("ResizeObserver loop limit exceeded"),
                ErrorPattern::text("Non-Error promise rejection captured"),
                ErrorPattern::regex(r"^Script error\.?$"),
            ],
            deny_urls: vec![
                r"^chrome-extension://".to_string(),
                r"^moz-extension://".to_string(),
                r"^safari-extension://".to_string(),
            ],
            allow_urls: Vec::new(),
            ignore_bots: true,
            ignore_localhost: false,
            max_errors_per_minute: rate_limiter::DEFAULT_MAX_ERRORS_PER_MINUTE,
            max_similar_errors: rate_limiter::DEFAULT_MAX_SIMILAR_ERRORS,
            sensitive_data_patterns: vec![
                r"(?i)\b(?:password|passwd|secret|token|api[_-]?key)\s*[=:]\s*[^\s,;&]+"
                    .to_string(),
                r"\b(?:\d[ -]?){13,16}\b".to_string(),
                r"[\w.+-]+@[\w-]+\.[\w.-]+".to_string(),
            ],
        }
    }
}

impl ErrorFilterConfig {
    /// Check caps and compile every pattern once
    pub fn validate(&self) -> SageResult<()> {
        if self.max_errors_per_minute == 0 {
            return Err(SageError::configuration(
                "filter",
                "max_errors_per_minute must be at least 1",
            ));
        }
        if self.max_similar_errors == 0 {
            return Err(SageError::configuration(
                "filter",
                "max_similar_errors must be at least 1",
            ));
        }
        CompiledPatterns::compile(self).map(|_| ())
    }
}

/// Why an error was withheld
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    RateLimited,
    SimilarErrorFlood,
    IgnoredMessage,
    DeniedUrl,
    NotAllowedUrl,
    Localhost,
    Bot,
    ExpectedStatus,
    ExpectedAuthFailure,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::RateLimited => "rate_limited",
            SuppressReason::SimilarErrorFlood => "similar_error_flood",
            SuppressReason::IgnoredMessage => "ignored_message",
            SuppressReason::DeniedUrl => "denied_url",
            SuppressReason::NotAllowedUrl => "not_allowed_url",
            SuppressReason::Localhost => "localhost",
            SuppressReason::Bot => "bot",
            SuppressReason::ExpectedStatus => "expected_status",
            SuppressReason::ExpectedAuthFailure => "expected_auth_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Capture,
    Suppress(SuppressReason),
}

impl FilterDecision {
    pub fn is_capture(&self) -> bool {
        matches!(self, FilterDecision::Capture)
    }
}

/// Request-side facts a filter decides on
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterContext<'a> {
    pub url: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    /// Transport status if it differs from the taxonomy status
    pub http_status: Option<u16>,
}

impl<'a> FilterContext<'a> {
    pub fn from_request(meta: &'a RequestMeta) -> Self {
        Self {
            url: meta.effective_url(),
            user_agent: meta.user_agent.as_deref(),
            http_status: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// Capture decision seam used by the error handler
pub trait CaptureFilter: Send + Sync + Debug {
    /// Decide on `error`, redacting it in place when admitted
    fn evaluate(&self, error: &mut AppError, ctx: &FilterContext<'_>) -> FilterDecision;

    fn should_capture_error(&self, error: &mut AppError, ctx: &FilterContext<'_>) -> bool {
        self.evaluate(error, ctx).is_capture()
    }
}

#[derive(Debug)]
enum CompiledPattern {
    Text(String),
    Regex(Regex),
}

impl CompiledPattern {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            CompiledPattern::Text(s) => haystack.contains(s.as_str()),
            CompiledPattern::Regex(re) => re.is_match(haystack),
        }
    }
}

#[derive(Debug)]
struct CompiledPatterns {
    ignore: Vec<CompiledPattern>,
    deny: Vec<Regex>,
    allow: Vec<Regex>,
    sensitive: Vec<Regex>,
}

impl CompiledPatterns {
    fn compile(config: &ErrorFilterConfig) -> SageResult<Self> {
        let ignore = config
            .ignore_errors
            .iter()
            .map(|p| match p {
                ErrorPattern::Text(s) => Ok(CompiledPattern::Text(s.clone())),
                ErrorPattern::Regex { regex } => compile_regex(regex).map(CompiledPattern::Regex),
            })
            .collect::<SageResult<Vec<_>>>()?;
        Ok(Self {
            ignore,
            deny: compile_all(&config.deny_urls)?,
            allow: compile_all(&config.allow_urls)?,
            sensitive: compile_all(&config.sensitive_data_patterns)?,
        })
    }
}

fn compile_regex(pattern: &str) -> SageResult<Regex> {
    Regex::new(pattern).map_err(|e| SageError::invalid_pattern(pattern, e))
}

fn compile_all(patterns: &[String]) -> SageResult<Vec<Regex>> {
    patterns.iter().map(|p| compile_regex(p)).collect()
}

/// Base filter shared by every specialized variant
#[derive(Debug)]
pub struct ErrorFilter {
    config: ErrorFilterConfig,
    patterns: CompiledPatterns,
    limiter: ErrorRateLimiter,
}

impl ErrorFilter {
    pub fn new(config: ErrorFilterConfig, clock: Arc<dyn Clock>) -> SageResult<Self> {
        config.validate()?;
        let patterns = CompiledPatterns::compile(&config)?;
        let limiter = ErrorRateLimiter::new(
            clock,
            config.max_errors_per_minute,
            config.max_similar_errors,
        );
        Ok(Self {
            config,
            patterns,
            limiter,
        })
    }

    pub fn config(&self) -> &ErrorFilterConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &ErrorRateLimiter {
        &self.limiter
    }

    /// Replace sensitive substrings of message and stack
    pub fn redact(&self, error: &mut AppError) {
        if self.patterns.sensitive.is_empty() {
            return;
        }
        error.message = self.redact_str(&error.message);
        if let Some(stack) = error.stack.as_mut() {
            *stack = self.redact_str(stack);
        }
    }

    fn redact_str(&self, text: &str) -> String {
        self.patterns
            .sensitive
            .iter()
            .fold(text.to_string(), |acc, re| re.replace_all(&acc, FILTERED).into_owned())
    }

    fn is_ignored(&self, error: &AppError) -> bool {
        self.patterns.ignore.iter().any(|p| {
            p.matches(&error.message) || error.stack.as_deref().is_some_and(|s| p.matches(s))
        })
    }

    fn check(&self, error: &AppError, ctx: &FilterContext<'_>) -> Option<SuppressReason> {
        match self.limiter.check(&error.message) {
            RateDecision::Allowed => {}
            RateDecision::ExactLimit => return Some(SuppressReason::RateLimited),
            RateDecision::SimilarLimit => return Some(SuppressReason::SimilarErrorFlood),
        }

        if self.is_ignored(error) {
            return Some(SuppressReason::IgnoredMessage);
        }

        if let Some(url) = ctx.url {
            if self.patterns.deny.iter().any(|re| re.is_match(url)) {
                return Some(SuppressReason::DeniedUrl);
            }
            if !self.patterns.allow.is_empty()
                && !self.patterns.allow.iter().any(|re| re.is_match(url))
            {
                return Some(SuppressReason::NotAllowedUrl);
            }
            if self.config.ignore_localhost && is_localhost(url) {
                return Some(SuppressReason::Localhost);
            }
        }

        if self.config.ignore_bots && ctx.user_agent.is_some_and(|ua| BOT_USER_AGENT.is_match(ua)) {
            return Some(SuppressReason::Bot);
        }

        None
    }
}

impl CaptureFilter for ErrorFilter {
    fn evaluate(&self, error: &mut AppError, ctx: &FilterContext<'_>) -> FilterDecision {
        match self.check(error, ctx) {
            Some(reason) => {
                trace!(code = %error.code(), reason = reason.as_str(), "Error suppressed");
                FilterDecision::Suppress(reason)
            }
            None => {
                self.redact(error);
                FilterDecision::Capture
            }
        }
    }
}

/// Whether `url` points at the local machine
pub fn is_localhost(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .is_some_and(|host| LOCAL_HOSTS.contains(&host)),
        // Relative URLs carry no host
        Err(url::ParseError::RelativeUrlWithoutBase) => false,
        Err(_) => LOCAL_HOSTS.iter().any(|h| url.contains(h)),
    }
}
