//! Error taxonomy, normalization and redaction
//!
//! Every error that crosses a public boundary is converted into an
//! [`AppError`] exactly once, at the normalization boundary. The record
//! carries one [`ErrorCode`] from the fixed taxonomy, and that code alone
//! decides the HTTP status, the default retryability and the message users
//! get to see.
//!
//! ## Error Families
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Sage Error Taxonomy                        │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  Client (4xx)           │  Server (5xx)        │  Retryable       │
//! │  ┌──────────────────┐   │  ┌────────────────┐  │  ┌────────────┐  │
//! │  │ • Validation 400 │   │  │ • Database 500 │  │  │ • Rate 429 │  │
//! │  │ • AuthN 401      │   │  │ • External 502 │  │  │ • Timeout  │  │
//! │  │ • AuthZ 403      │   │  │ • Internal 500 │  │  │ • Network  │  │
//! │  │ • NotFound 404   │   │  │ • Config 500   │  │  │ • Database │  │
//! │  │ • Conflict 409   │   │  │ • Unavail. 503 │  │  │ • External │  │
//! │  │ • Business 422   │   │  └────────────────┘  │  └────────────┘  │
//! │  └──────────────────┘   │                      │                  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Business code returns [`DomainError`] (or `AppError` directly) inside a
//! `Result`; `?` converts through the `From` impls in [`conversions`].
//! Errors from code we do not control are classified by
//! [`ErrorNormalizer`], which only sniffs message text as a last resort.

pub mod app_error;
pub mod context;
pub mod conversions;
pub mod domain;
pub mod normalize;
pub mod sanitize;
pub mod taxonomy;
pub mod types;

#[cfg(test)]
mod tests;

pub use app_error::{AppError, ErrorDetail, RETRY_AFTER_FIELD};
pub use context::{ErrorContext, ErrorContextBuilder, RequestMeta};
pub use conversions::validation_details;
pub use domain::DomainError;
pub use normalize::{classify, ErrorNormalizer};
pub use sanitize::sanitize_error_message;
pub use taxonomy::{ErrorCode, ErrorFamily};
pub use types::{SageError, SageResult};
