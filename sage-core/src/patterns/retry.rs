//! Retry with bounded exponential backoff for transient failures
//!
//! Attempts run sequentially. The delay before attempt `n + 1` is
//! `min(base_delay * backoff_multiplier^(n - 1), max_delay)`; there is no
//! jitter. A failure on the last attempt, or one the predicate rejects, is
//! returned immediately without waiting.

use crate::abstractions::time::{Clock, SystemClock};
use crate::error::{AppError, SageError, SageResult};
use crate::metrics::{names, MetricsRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a failed attempt should be retried
#[derive(Clone)]
pub struct RetryPredicate(Arc<dyn Fn(&AppError) -> bool + Send + Sync>);

impl RetryPredicate {
    pub fn new(f: impl Fn(&AppError) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn check(&self, error: &AppError) -> bool {
        (self.0)(error)
    }
}

impl Default for RetryPredicate {
    /// Trust the retryable flag set when the error was constructed
    fn default() -> Self {
        Self::new(AppError::is_retryable)
    }
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPredicate(..)")
    }
}

/// Configuration for retry operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(skip)]
    pub should_retry: RetryPredicate,
    /// Per-operation identifier for better observability
    pub operation_name: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            should_retry: RetryPredicate::default(),
            operation_name: None,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryBuilder {
        RetryBuilder::new()
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Always within `0..=max_delay`, even for a config that would not pass
    /// [`validate`](Self::validate).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_delay)
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_should_retry(mut self, f: impl Fn(&AppError) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = RetryPredicate::new(f);
        self
    }

    pub fn validate(&self) -> SageResult<()> {
        if self.max_attempts == 0 {
            return Err(SageError::configuration("retry", "max_attempts must be at least 1"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(SageError::configuration(
                "retry",
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(SageError::configuration(
                "retry",
                "base_delay must not exceed max_delay",
            ));
        }
        Ok(())
    }

    /// Network calls: more attempts, shorter first wait
    pub fn for_network_operations(operation_name: &str) -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            operation_name: Some(operation_name.to_string()),
            ..Default::default()
        }
    }

    /// AI/content service calls: slow upstreams, fewer attempts
    pub fn for_ai_service(operation_name: &str) -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            operation_name: Some(operation_name.to_string()),
            ..Default::default()
        }
    }

    /// Database calls: only connection-level failures are worth replaying
    pub fn for_database(operation_name: &str) -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            should_retry: RetryPredicate::new(|e| {
                e.is_retryable()
                    && matches!(
                        e.code(),
                        crate::error::ErrorCode::DatabaseConnectionError
                            | crate::error::ErrorCode::DatabaseError
                            | crate::error::ErrorCode::Timeout
                    )
            }),
            operation_name: Some(operation_name.to_string()),
        }
    }
}

/// Fluent builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn should_retry(mut self, f: impl Fn(&AppError) -> bool + Send + Sync + 'static) -> Self {
        self.config.should_retry = RetryPredicate::new(f);
        self
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.config.operation_name = Some(name.into());
        self
    }

    pub fn build(self) -> SageResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Runs operations under a [`RetryConfig`] on an injected clock
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
    metrics: Option<MetricsRegistry>,
    defaults: RetryConfig,
}

impl RetryExecutor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            metrics: None,
            defaults: RetryConfig::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Policy used by [`run_default`](Self::run_default)
    pub fn with_defaults(mut self, defaults: RetryConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &RetryConfig {
        &self.defaults
    }

    /// Run `operation` under the executor's default policy, labelled `operation_name`
    pub async fn run_default<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        let config = self.defaults.clone().with_operation_name(operation_name);
        self.run(operation, &config).await
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts
    pub async fn run<F, Fut, T, E>(&self, mut operation: F, config: &RetryConfig) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AppError>,
    {
        let name = config.operation_name.as_deref().unwrap_or("operation");
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error: AppError = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded after {} attempts", name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e.into(),
            };

            if !config.should_retry.check(&error) {
                debug!(code = %error.code(), "{} failed with non-retryable error", name);
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    code = %error.code(),
                    "{} gave up after {} attempts: {}", name, attempt, error.message
                );
                if let Some(metrics) = &self.metrics {
                    metrics.increment_counter(names::RETRY_EXHAUSTED);
                }
                return Err(error);
            }

            let delay = config.delay_for(attempt);
            warn!(
                "Retry attempt {}/{} for {} after error: {} (waiting {:?})",
                attempt, max_attempts, name, error, delay
            );
            if let Some(metrics) = &self.metrics {
                metrics.increment_labelled(names::RETRY_ATTEMPTS, name);
            }
            self.clock.sleep(delay).await;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

/// Retry `operation` on the system clock
pub async fn with_retry<F, Fut, T, E>(operation: F, config: &RetryConfig) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<AppError>,
{
    RetryExecutor::default().run(operation, config).await
}
