//! The fixed error taxonomy
//!
//! Every normalized error carries exactly one [`ErrorCode`]. The code alone
//! determines the HTTP status, the family, the default retryability and the
//! user-facing message; none of these are ever set independently.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad grouping of error codes. Each family fixes the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFamily {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    Database,
    ExternalService,
    System,
    BusinessLogic,
}

impl ErrorFamily {
    /// Terse message shown to end users when sensitive info is withheld
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorFamily::Validation => "Please check your input and try again.",
            ErrorFamily::Authentication => "Please sign in to continue.",
            ErrorFamily::Authorization => "You do not have permission to perform this action.",
            ErrorFamily::NotFound => "The requested resource was not found.",
            ErrorFamily::Conflict => "This resource conflicts with existing data.",
            ErrorFamily::RateLimit => "Too many requests. Please slow down and try again shortly.",
            ErrorFamily::Database => "We are having trouble accessing your data. Please try again.",
            ErrorFamily::ExternalService => {
                "A service we depend on is unavailable. Please try again later."
            }
            ErrorFamily::System => "Something went wrong on our end. Please try again later.",
            ErrorFamily::BusinessLogic => "This action cannot be completed right now.",
        }
    }
}

macro_rules! taxonomy {
    ($( $variant:ident => ($code:literal, $status:literal, $family:ident, $retryable:literal) ),+ $(,)?) => {
        /// Taxonomy code carried by every [`AppError`](super::AppError)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ErrorCode {
            $(
                #[serde(rename = $code)]
                $variant,
            )+
        }

        impl ErrorCode {
            /// Every code in the taxonomy
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$variant),+];

            /// Wire representation, e.g. `VALIDATION_ERROR`
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorCode::$variant => $code,)+
                }
            }

            /// HTTP status for this code
            pub fn status_code(&self) -> u16 {
                match self {
                    $(ErrorCode::$variant => $status,)+
                }
            }

            /// Family this code belongs to
            pub fn family(&self) -> ErrorFamily {
                match self {
                    $(ErrorCode::$variant => ErrorFamily::$family,)+
                }
            }

            /// Whether errors with this code are retryable unless stated otherwise
            pub fn default_retryable(&self) -> bool {
                match self {
                    $(ErrorCode::$variant => $retryable,)+
                }
            }

            /// Parse the wire representation
            pub fn parse(code: &str) -> Option<ErrorCode> {
                match code {
                    $($code => Some(ErrorCode::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

taxonomy! {
    // Validation
    ValidationError => ("VALIDATION_ERROR", 400, Validation, false),
    InvalidInput => ("INVALID_INPUT", 400, Validation, false),
    MissingRequiredField => ("MISSING_REQUIRED_FIELD", 400, Validation, false),
    InvalidFormat => ("INVALID_FORMAT", 400, Validation, false),

    // Authentication
    AuthenticationError => ("AUTHENTICATION_ERROR", 401, Authentication, false),
    InvalidCredentials => ("INVALID_CREDENTIALS", 401, Authentication, false),
    TokenExpired => ("TOKEN_EXPIRED", 401, Authentication, false),
    TokenInvalid => ("TOKEN_INVALID", 401, Authentication, false),

    // Authorization
    AuthorizationError => ("AUTHORIZATION_ERROR", 403, Authorization, false),
    InsufficientPermissions => ("INSUFFICIENT_PERMISSIONS", 403, Authorization, false),

    // Resources
    NotFound => ("NOT_FOUND", 404, NotFound, false),
    ResourceNotFound => ("RESOURCE_NOT_FOUND", 404, NotFound, false),
    Conflict => ("CONFLICT", 409, Conflict, false),
    ResourceAlreadyExists => ("RESOURCE_ALREADY_EXISTS", 409, Conflict, false),

    // Rate limiting and abuse
    RateLimitExceeded => ("RATE_LIMIT_EXCEEDED", 429, RateLimit, true),
    TooManyRequests => ("TOO_MANY_REQUESTS", 429, RateLimit, true),
    QuotaExceeded => ("QUOTA_EXCEEDED", 429, RateLimit, false),

    // Database
    DatabaseError => ("DATABASE_ERROR", 500, Database, true),
    DatabaseConnectionError => ("DATABASE_CONNECTION_ERROR", 503, Database, true),
    DatabaseConstraintViolation => ("DATABASE_CONSTRAINT_VIOLATION", 409, Database, false),

    // External services
    ExternalServiceError => ("EXTERNAL_SERVICE_ERROR", 502, ExternalService, true),
    AiServiceError => ("AI_SERVICE_ERROR", 502, ExternalService, true),
    NetworkError => ("NETWORK_ERROR", 503, ExternalService, true),

    // System
    InternalServerError => ("INTERNAL_SERVER_ERROR", 500, System, false),
    ServiceUnavailable => ("SERVICE_UNAVAILABLE", 503, System, true),
    Timeout => ("TIMEOUT", 408, System, true),
    ConfigurationError => ("CONFIGURATION_ERROR", 500, System, false),
    PerformanceDegraded => ("PERFORMANCE_DEGRADED", 500, System, false),

    // Business logic
    BusinessRuleViolation => ("BUSINESS_RULE_VIOLATION", 422, BusinessLogic, false),
    InvalidLearningState => ("INVALID_LEARNING_STATE", 422, BusinessLogic, false),
    ContentUnavailable => ("CONTENT_UNAVAILABLE", 422, BusinessLogic, false),
}

impl ErrorCode {
    /// Terse user-facing message for this code's family
    pub fn user_message(&self) -> &'static str {
        self.family().user_message()
    }

    /// Whether this code denotes a server-side failure (status >= 500)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_status_codes() {
        assert_eq!(ErrorCode::ValidationError.status_code(), 400);
        assert_eq!(ErrorCode::AuthenticationError.status_code(), 401);
        assert_eq!(ErrorCode::AuthorizationError.status_code(), 403);
        assert_eq!(ErrorCode::NotFound.status_code(), 404);
        assert_eq!(ErrorCode::Conflict.status_code(), 409);
        assert_eq!(ErrorCode::RateLimitExceeded.status_code(), 429);
        assert_eq!(ErrorCode::DatabaseError.status_code(), 500);
        assert_eq!(ErrorCode::ExternalServiceError.status_code(), 502);
        assert_eq!(ErrorCode::BusinessRuleViolation.status_code(), 422);
        assert_eq!(ErrorCode::Timeout.status_code(), 408);
    }

    #[test]
    fn test_wire_names_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(*code));
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
        assert_eq!(ErrorCode::parse("NOPE"), None);
    }

    #[test]
    fn test_taxonomy_size() {
        assert!(ErrorCode::ALL.len() >= 30);
    }

    #[test]
    fn test_user_message_is_per_family() {
        assert_eq!(
            ErrorCode::InvalidFormat.user_message(),
            ErrorCode::ValidationError.user_message()
        );
        assert_eq!(
            ErrorCode::ValidationError.user_message(),
            "Please check your input and try again."
        );
    }
}
