//! Typed errors raised by business logic
//!
//! Business code returns these inside `Result`; the normalizer maps each
//! variant onto exactly one taxonomy code.

use super::app_error::{ErrorDetail, RETRY_AFTER_FIELD};
use super::taxonomy::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Errors the application raises on purpose
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<ErrorDetail>,
    },

    #[error("{message}")]
    Authentication { message: String },

    #[error("{message}")]
    Authorization { message: String },

    #[error("{resource} not found")]
    NotFound {
        resource: String,
        id: Option<String>,
    },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Database operation '{operation}' failed")]
    Database {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("External service '{service}' failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("{message}")]
    BusinessRule { rule: String, message: String },

    #[error("Network request failed: {message}")]
    Network {
        message: String,
        /// HTTP status of the failed response, if one was received
        status: Option<u16>,
    },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

impl DomainError {
    pub fn validation(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        DomainError::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        DomainError::Authentication {
            message: message.into(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        DomainError::Authorization {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        DomainError::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        DomainError::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn database<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        DomainError::Database {
            operation: operation.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn business_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::BusinessRule {
            rule: rule.into(),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>, status: Option<u16>) -> Self {
        DomainError::Network {
            message: message.into(),
            status,
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        DomainError::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Taxonomy code for this variant
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::Validation { .. } => ErrorCode::ValidationError,
            DomainError::Authentication { .. } => ErrorCode::AuthenticationError,
            DomainError::Authorization { .. } => ErrorCode::AuthorizationError,
            DomainError::NotFound { .. } => ErrorCode::NotFound,
            DomainError::Conflict { .. } => ErrorCode::Conflict,
            DomainError::RateLimit { .. } => ErrorCode::RateLimitExceeded,
            DomainError::Database { .. } => ErrorCode::DatabaseError,
            DomainError::ExternalService { .. } => ErrorCode::ExternalServiceError,
            DomainError::BusinessRule { .. } => ErrorCode::BusinessRuleViolation,
            DomainError::Network { .. } => ErrorCode::NetworkError,
            DomainError::Timeout { .. } => ErrorCode::Timeout,
        }
    }

    /// Retryability decided when the error is constructed
    ///
    /// A network error is retryable iff the response status is unknown, a
    /// server error, or 429. Everything else follows the taxonomy default.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::Network { status, .. } => match status {
                None => true,
                Some(status) => *status >= 500 || *status == 429,
            },
            other => other.code().default_retryable(),
        }
    }

    /// Structured details carried by the variant
    pub fn details(&self) -> Vec<ErrorDetail> {
        match self {
            DomainError::Validation { details, .. } => details.clone(),
            DomainError::NotFound { resource, id } => id
                .iter()
                .map(|id| ErrorDetail::field("id", format!("{resource} not found")).with_value(id.as_str()))
                .collect(),
            DomainError::RateLimit { retry_after, .. } => retry_after
                .iter()
                .map(|d| {
                    ErrorDetail::field(RETRY_AFTER_FIELD, "Retry after the given number of seconds")
                        .with_value(d.as_secs().max(1))
                })
                .collect(),
            DomainError::BusinessRule { rule, .. } => {
                vec![ErrorDetail::new("Business rule violated").with_metadata("rule", rule.as_str())]
            }
            DomainError::Network { status: Some(status), .. } => {
                vec![ErrorDetail::field("status", "Upstream response status").with_value(*status)]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_retryability_by_status() {
        assert!(DomainError::network("reset", None).is_retryable());
        assert!(DomainError::network("bad gateway", Some(502)).is_retryable());
        assert!(DomainError::network("throttled", Some(429)).is_retryable());
        assert!(!DomainError::network("not found", Some(404)).is_retryable());
        assert!(!DomainError::network("bad request", Some(400)).is_retryable());
    }

    #[test]
    fn test_rate_limit_carries_retry_after_detail() {
        let err = DomainError::rate_limit("slow", Some(Duration::from_secs(42)));
        let details = err.details();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].field.as_deref(), Some(RETRY_AFTER_FIELD));
        assert_eq!(details[0].value, Some(serde_json::json!(42)));
    }

    #[test]
    fn test_not_found_message() {
        let err = DomainError::not_found_with_id("Lesson", "l-9");
        assert_eq!(err.to_string(), "Lesson not found");
        assert_eq!(err.details()[0].value, Some(serde_json::json!("l-9")));
    }
}
