//! Resilience patterns applied at call sites before errors reach the handler

pub mod retry;

pub use retry::{with_retry, RetryBuilder, RetryConfig, RetryExecutor, RetryPredicate};
