//! Error classification, resilience and diagnostics rate control for the
//! Sage learning assistant.

pub mod abstractions;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod metrics;
pub mod monitoring;
pub mod observability;
pub mod patterns;
pub mod runtime;
pub mod session;

pub use config::{ConfigBuilder, Environment, SageConfig};
pub use error::{AppError, DomainError, ErrorCode, ErrorFamily, SageError, SageResult};
pub use handler::{ErrorHandler, ErrorId, ErrorResponse, HandlerConfig};
pub use runtime::{DiagnosticsRuntime, FilterProfile};
