//! `From` conversions into [`AppError`]
//!
//! These let any layer return `Result<T, AppError>` and use `?` on typed
//! domain errors, schema-validation failures, JSON parse failures, IO errors
//! and elapsed timeouts.

use super::app_error::{AppError, ErrorDetail};
use super::domain::DomainError;
use super::taxonomy::ErrorCode;
use super::types::SageError;
use serde_json::Value;
use std::error::Error as _;
use validator::{ValidationErrors, ValidationErrorsKind};

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        from_domain(&err)
    }
}

pub(crate) fn from_domain(err: &DomainError) -> AppError {
    let mut app = AppError::new(err.code(), err.to_string())
        .with_details(err.details())
        .with_retryable(err.is_retryable());
    if let Some(source) = err.source() {
        app = app.with_cause(source.to_string());
    }
    app
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::new(ErrorCode::ValidationError, "Validation failed")
            .with_details(validation_details(&errors))
    }
}

/// One detail per field issue, nested structs and lists flattened into
/// dotted / indexed field paths, ordered by field path
pub fn validation_details(errors: &ValidationErrors) -> Vec<ErrorDetail> {
    let mut details = Vec::new();
    collect_validation_details(errors, "", &mut details);
    details.sort_by(|a, b| a.field.cmp(&b.field));
    details
}

fn collect_validation_details(errors: &ValidationErrors, prefix: &str, out: &mut Vec<ErrorDetail>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(issues) => {
                for issue in issues {
                    let message = issue
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value for {path}"));

                    let mut expected: Vec<String> = issue
                        .params
                        .iter()
                        .filter(|(k, _)| k.as_ref() != "value")
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect();
                    expected.sort();

                    let mut detail = ErrorDetail::field(path.clone(), message)
                        .with_metadata("code", issue.code.as_ref());
                    if let Some(value) = issue.params.get("value") {
                        detail = detail.with_value(value.clone());
                    }
                    if !expected.is_empty() {
                        detail = detail.with_expected(expected.join(", "));
                    }
                    out.push(detail);
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                collect_validation_details(nested, &path, out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_details(nested, &format!("{path}[{index}]"), out);
                }
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        from_json(&err)
    }
}

pub(crate) fn from_json(err: &serde_json::Error) -> AppError {
    use serde_json::error::Category;
    let code = match err.classify() {
        Category::Syntax | Category::Eof => ErrorCode::InvalidFormat,
        Category::Data => ErrorCode::ValidationError,
        Category::Io => ErrorCode::InternalServerError,
    };
    AppError::new(code, err.to_string()).with_detail(
        ErrorDetail::new("Malformed payload")
            .with_metadata("line", Value::from(err.line()))
            .with_metadata("column", Value::from(err.column())),
    )
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        from_elapsed(&err)
    }
}

pub(crate) fn from_elapsed(err: &tokio::time::error::Elapsed) -> AppError {
    AppError::new(ErrorCode::Timeout, format!("Operation timed out: {err}"))
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        from_io(&err)
    }
}

pub(crate) fn from_io(err: &std::io::Error) -> AppError {
    use std::io::ErrorKind;
    let code = match err.kind() {
        ErrorKind::TimedOut => ErrorCode::Timeout,
        ErrorKind::InvalidData => ErrorCode::InvalidFormat,
        ErrorKind::NotFound => ErrorCode::ResourceNotFound,
        ErrorKind::PermissionDenied => ErrorCode::InsufficientPermissions,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            ErrorCode::NetworkError
        }
        _ => ErrorCode::InternalServerError,
    };
    AppError::new(code, err.to_string())
}

impl From<SageError> for AppError {
    fn from(err: SageError) -> Self {
        from_sage(&err)
    }
}

pub(crate) fn from_sage(err: &SageError) -> AppError {
    let code = match err {
        SageError::ConfigurationError { .. } | SageError::InvalidPattern { .. } => {
            ErrorCode::ConfigurationError
        }
        SageError::NoActiveSession => ErrorCode::InvalidLearningState,
        _ => ErrorCode::InternalServerError,
    };
    AppError::new(code, err.to_string())
}
