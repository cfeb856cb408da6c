//! Unified configuration for the diagnostics core
//!
//! Loaded from TOML, then overridden from `SAGE_*` environment variables,
//! then validated. Every section is `#[serde(default)]`, so an empty file is
//! a valid configuration.
//!
//! Handler switches are special: the file only holds explicit overrides, and
//! anything left unset falls back to the defaults of the active
//! [`Environment`].

use crate::error::{SageError, SageResult};
use crate::filter::{ErrorFilterConfig, ErrorPattern};
use crate::handler::{HandlerConfig, DEFAULT_SERVICE_NAME};
use crate::monitoring::MonitorConfig;
use crate::patterns::retry::RetryConfig;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Resolve from `SAGE_ENV`, falling back to `NODE_ENV`
    pub fn from_env() -> Option<Self> {
        std::env::var("SAGE_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .ok()
            .map(|v| Self::parse(&v))
    }

    /// `production` (or `prod`) is Production; anything else is Development
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Explicit handler overrides; unset fields follow the environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerOverrides {
    pub include_stack: Option<bool>,
    pub include_sensitive_info: Option<bool>,
    pub log_errors: Option<bool>,
    pub notify_external: Option<bool>,
    pub sanitize_error_messages: Option<bool>,
}

impl HandlerOverrides {
    pub fn apply(&self, base: HandlerConfig) -> HandlerConfig {
        HandlerConfig {
            include_stack: self.include_stack.unwrap_or(base.include_stack),
            include_sensitive_info: self
                .include_sensitive_info
                .unwrap_or(base.include_sensitive_info),
            log_errors: self.log_errors.unwrap_or(base.log_errors),
            notify_external: self.notify_external.unwrap_or(base.notify_external),
            sanitize_error_messages: self
                .sanitize_error_messages
                .unwrap_or(base.sanitize_error_messages),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Reported as `service` in exported diagnostics
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SageConfig {
    pub environment: Environment,
    pub handler: HandlerOverrides,
    pub filter: ErrorFilterConfig,
    pub retry: RetryConfig,
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
    pub observability: ObservabilityConfig,
}

impl SageConfig {
    /// Defaults (or `path`), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> SageResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SageResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            SageError::configuration(
                "config",
                format!("Failed to read {}: {}", path.as_ref().display(), e),
            )
        })?;

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse without applying the environment or validating
    pub fn from_toml_str(contents: &str) -> SageResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> SageResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(environment) = Environment::from_env() {
            self.environment = environment;
        }

        // Handler
        if let Some(v) = env_parse::<bool>("SAGE_INCLUDE_STACK") {
            self.handler.include_stack = Some(v);
        }
        if let Some(v) = env_parse::<bool>("SAGE_INCLUDE_SENSITIVE_INFO") {
            self.handler.include_sensitive_info = Some(v);
        }
        if let Some(v) = env_parse::<bool>("SAGE_LOG_ERRORS") {
            self.handler.log_errors = Some(v);
        }
        if let Some(v) = env_parse::<bool>("SAGE_NOTIFY_EXTERNAL") {
            self.handler.notify_external = Some(v);
        }
        if let Some(v) = env_parse::<bool>("SAGE_SANITIZE_ERROR_MESSAGES") {
            self.handler.sanitize_error_messages = Some(v);
        }

        // Filter
        if let Some(v) = env_parse::<u32>("SAGE_MAX_ERRORS_PER_MINUTE") {
            self.filter.max_errors_per_minute = v;
        }
        if let Some(v) = env_parse::<u32>("SAGE_MAX_SIMILAR_ERRORS") {
            self.filter.max_similar_errors = v;
        }
        if let Some(list) = env_list("SAGE_IGNORE_ERRORS") {
            self.filter.ignore_errors = list.into_iter().map(ErrorPattern::Text).collect();
        }
        if let Some(list) = env_list("SAGE_DENY_URLS") {
            self.filter.deny_urls = list;
        }
        if let Some(list) = env_list("SAGE_ALLOW_URLS") {
            self.filter.allow_urls = list;
        }

        // Observability
        if let Ok(level) = std::env::var("SAGE_LOG_LEVEL") {
            self.observability.log_level = level.trim().to_ascii_lowercase();
        }
        if let Ok(name) = std::env::var("SAGE_SERVICE_NAME") {
            self.observability.service_name = name;
        }
    }

    pub fn validate(&self) -> SageResult<()> {
        self.filter.validate()?;
        self.retry.validate()?;
        self.monitor.validate()?;
        self.session.validate()?;

        if !LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(SageError::configuration(
                "observability",
                format!(
                    "log_level must be one of {}, got '{}'",
                    LOG_LEVELS.join(", "),
                    self.observability.log_level
                ),
            ));
        }
        if self.observability.service_name.trim().is_empty() {
            return Err(SageError::configuration(
                "observability",
                "service_name cannot be empty",
            ));
        }
        Ok(())
    }

    /// Environment defaults with the explicit overrides applied
    pub fn handler_config(&self) -> HandlerConfig {
        self.handler
            .apply(HandlerConfig::for_environment(self.environment))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let value = raw.trim();
    let parsed = match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" => T::from_str("true").ok(),
        "0" | "no" | "off" => T::from_str("false").ok(),
        _ => None,
    }
    .or_else(|| T::from_str(value).ok());
    if parsed.is_none() {
        warn!("Ignoring {}: cannot parse '{}'", key, value);
    }
    parsed
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Fluent builder for [`SageConfig`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: SageConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn handler(mut self, overrides: HandlerOverrides) -> Self {
        self.config.handler = overrides;
        self
    }

    pub fn filter(mut self, filter: ErrorFilterConfig) -> Self {
        self.config.filter = filter;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.config.monitor = monitor;
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.observability.log_level = level.into();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.observability.log_format = format;
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.observability.service_name = name.into();
        self
    }

    pub fn build(self) -> SageResult<SageConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
