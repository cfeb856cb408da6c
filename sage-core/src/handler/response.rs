//! Transport response built for every handled error

use super::ErrorId;
use crate::error::{ErrorCode, ErrorDetail};
use chrono::{DateTime, Utc};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE, RETRY_AFTER,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

const FALLBACK_BODY: &str =
    r#"{"success":false,"error":{"code":"INTERNAL_SERVER_ERROR","message":"An unexpected error occurred."}}"#;

/// `error` member of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Vec<ErrorDetail>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
}

/// `{success: false, error: {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(error: ErrorBody) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

/// Status, headers and body for one handled error
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ErrorEnvelope,
    pub error_id: ErrorId,
    /// Whether the error passed the capture filter
    pub captured: bool,
}

impl ErrorResponse {
    pub(crate) fn new(status: u16, body: ErrorEnvelope, error_id: ErrorId, captured: bool) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: default_headers(),
            body,
            error_id,
            captured,
        }
    }

    pub(crate) fn with_retry_after(mut self, seconds: u64) -> Self {
        self.headers.insert(RETRY_AFTER, HeaderValue::from(seconds));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.body.error.code
    }

    pub fn body_json(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|_| FALLBACK_BODY.to_string())
    }

    pub fn into_http(self) -> http::Response<String> {
        let body = self.body_json();
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let (parts, body) = self.into_http().into_parts();
        axum::response::Response::from_parts(parts, axum::body::Body::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: ErrorCode) -> ErrorEnvelope {
        ErrorEnvelope::new(ErrorBody {
            code,
            message: code.user_message().to_string(),
            timestamp: Utc::now(),
            details: None,
            request_id: Some("req-1".into()),
            stack: None,
        })
    }

    #[test]
    fn test_into_http_carries_status_headers_and_body() {
        let response = ErrorResponse::new(429, body(ErrorCode::RateLimitExceeded), ErrorId::new(), true)
            .with_retry_after(30);
        let http = response.into_http();

        assert_eq!(http.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(http.headers()[RETRY_AFTER], "30");
        assert_eq!(http.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(http.headers()[CONTENT_TYPE], "application/json");

        let json: serde_json::Value = serde_json::from_str(http.body()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["error"]["requestId"], "req-1");
        assert!(json["error"].get("stack").is_none());
        assert!(json["error"].get("details").is_none());
    }
}
