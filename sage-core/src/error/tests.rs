//! Family-level checks for typed error normalization
//!
//! Every typed error must land on the fixed `{code, status, retryable}`
//! triple of its family, whatever message or payload it carries.

use super::*;
use std::time::Duration;

fn triple(err: DomainError) -> (ErrorCode, u16, bool) {
    let app = ErrorNormalizer::new().normalize(&err, &RequestMeta::default());
    (app.code(), app.status_code(), app.is_retryable())
}

#[test]
fn test_typed_errors_map_to_family_triples() {
    let cases = vec![
        (
            DomainError::validation("bad", vec![ErrorDetail::field("email", "required")]),
            (ErrorCode::ValidationError, 400, false),
        ),
        (
            DomainError::authentication("who are you"),
            (ErrorCode::AuthenticationError, 401, false),
        ),
        (
            DomainError::authorization("not yours"),
            (ErrorCode::AuthorizationError, 403, false),
        ),
        (DomainError::not_found("Module"), (ErrorCode::NotFound, 404, false)),
        (DomainError::conflict("exists"), (ErrorCode::Conflict, 409, false)),
        (
            DomainError::rate_limit("slow", None),
            (ErrorCode::RateLimitExceeded, 429, true),
        ),
        (
            DomainError::Database {
                operation: "insert".into(),
                source: None,
            },
            (ErrorCode::DatabaseError, 500, true),
        ),
        (
            DomainError::external_service("tutor-llm", "503"),
            (ErrorCode::ExternalServiceError, 502, true),
        ),
        (
            DomainError::business_rule("one_attempt", "quiz already submitted"),
            (ErrorCode::BusinessRuleViolation, 422, false),
        ),
        (
            DomainError::timeout("grade", Duration::from_secs(3)),
            (ErrorCode::Timeout, 408, true),
        ),
    ];

    for (err, expected) in cases {
        let label = err.to_string();
        assert_eq!(triple(err), expected, "{label}");
    }
}

#[test]
fn test_validation_details_survive_normalization() {
    let err = DomainError::validation(
        "bad",
        vec![
            ErrorDetail::field("email", "required"),
            ErrorDetail::field("age", "too small").with_value(3).with_expected(">= 13"),
        ],
    );
    let app = ErrorNormalizer::new().normalize(&err, &RequestMeta::default());
    assert_eq!(app.details.len(), 2);
    assert_eq!(app.details[1].expected.as_deref(), Some(">= 13"));
}

#[test]
fn test_request_meta_attached() {
    let meta = RequestMeta::new()
        .with_request_id("req-7")
        .with_path("/api/lessons/4")
        .with_method("GET")
        .with_ip("203.0.113.9");
    let app = ErrorNormalizer::new().normalize(&DomainError::not_found("Lesson"), &meta);
    assert_eq!(app.request_id.as_deref(), Some("req-7"));
    assert_eq!(app.path.as_deref(), Some("/api/lessons/4"));
    assert_eq!(app.method.as_deref(), Some("GET"));
    assert_eq!(app.ip.as_deref(), Some("203.0.113.9"));
}

#[test]
fn test_status_is_always_taxonomy_lookup() {
    for code in ErrorCode::ALL {
        let app = AppError::new(*code, "x");
        assert_eq!(app.status_code(), code.status_code());
        assert_eq!(app.is_retryable(), code.default_retryable());
    }
}
