//! Per-minute quota and similarity deduplication for captured errors
//!
//! Two counters are kept, both keyed by the current minute bucket: one per
//! exact message and one per similarity key (the message with numbers,
//! quotes and extra whitespace stripped). Both maps are cleared wholesale
//! when more than [`CLEANUP_INTERVAL`] has passed since the last cleanup.
//! This is a coarse window, not a per-key sliding window: a burst that
//! straddles a cleanup can be admitted twice.

use crate::abstractions::time::{Clock, Instant};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_ERRORS_PER_MINUTE: u32 = 50;
pub const DEFAULT_MAX_SIMILAR_ERRORS: u32 = 5;
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const SIMILARITY_KEY_LEN: usize = 100;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));
static QUOTES: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"`]"#).expect("quote pattern is valid"));
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// The exact message hit `max_errors_per_minute`
    ExactLimit,
    /// Structurally similar messages hit `max_similar_errors`
    SimilarLimit,
}

struct LimiterState {
    error_counts: HashMap<String, u32>,
    similar_counts: HashMap<String, u32>,
    last_cleanup: Instant,
}

/// Owned, clock-driven error rate limiter
pub struct ErrorRateLimiter {
    clock: Arc<dyn Clock>,
    max_errors_per_minute: u32,
    max_similar_errors: u32,
    state: Mutex<LimiterState>,
}

impl std::fmt::Debug for ErrorRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRateLimiter")
            .field("max_errors_per_minute", &self.max_errors_per_minute)
            .field("max_similar_errors", &self.max_similar_errors)
            .finish_non_exhaustive()
    }
}

impl ErrorRateLimiter {
    pub fn new(clock: Arc<dyn Clock>, max_errors_per_minute: u32, max_similar_errors: u32) -> Self {
        let last_cleanup = clock.now();
        Self {
            clock,
            max_errors_per_minute,
            max_similar_errors,
            state: Mutex::new(LimiterState {
                error_counts: HashMap::new(),
                similar_counts: HashMap::new(),
                last_cleanup,
            }),
        }
    }

    /// Limiter with the default caps (50 exact / 5 similar per minute)
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, DEFAULT_MAX_ERRORS_PER_MINUTE, DEFAULT_MAX_SIMILAR_ERRORS)
    }

    /// Check `message` against both quotas and count it if admitted
    ///
    /// The whole check-and-increment runs under one lock acquisition.
    pub fn check(&self, message: &str) -> RateDecision {
        let now = self.clock.now();
        let minute = self.clock.epoch_millis() / 60_000;
        let exact_key = format!("{minute}:{message}");
        let similar_key = format!("{minute}:{}", similarity_key(message));

        let mut state = self.state.lock();
        if now.duration_since(state.last_cleanup) > CLEANUP_INTERVAL {
            debug!(
                exact = state.error_counts.len(),
                similar = state.similar_counts.len(),
                "Clearing error rate counters"
            );
            state.error_counts.clear();
            state.similar_counts.clear();
            state.last_cleanup = now;
        }

        let exact = state.error_counts.get(&exact_key).copied().unwrap_or(0);
        if exact >= self.max_errors_per_minute {
            return RateDecision::ExactLimit;
        }
        let similar = state.similar_counts.get(&similar_key).copied().unwrap_or(0);
        if similar >= self.max_similar_errors {
            return RateDecision::SimilarLimit;
        }

        state.error_counts.insert(exact_key, exact + 1);
        state.similar_counts.insert(similar_key, similar + 1);
        RateDecision::Allowed
    }

    pub fn should_capture(&self, message: &str) -> bool {
        self.check(message) == RateDecision::Allowed
    }

    /// Number of tracked (exact, similar) keys
    pub fn tracked_keys(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.error_counts.len(), state.similar_counts.len())
    }

    pub fn max_errors_per_minute(&self) -> u32 {
        self.max_errors_per_minute
    }

    pub fn max_similar_errors(&self) -> u32 {
        self.max_similar_errors
    }
}

/// Group structurally identical messages that differ only in parameters
pub fn similarity_key(message: &str) -> String {
    let replaced = DIGITS.replace_all(message, "N");
    let unquoted = QUOTES.replace_all(&replaced, "");
    let collapsed = WHITESPACE.replace_all(&unquoted, " ");
    collapsed
        .trim()
        .to_lowercase()
        .chars()
        .take(SIMILARITY_KEY_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::time::MockClock;
    use proptest::prelude::*;

    #[test]
    fn test_similarity_key_normalization() {
        assert_eq!(similarity_key("User 1 not found"), "user n not found");
        assert_eq!(similarity_key("User 42 not found"), "user n not found");
        assert_eq!(
            similarity_key("  Lesson \"intro\"   failed\tto load "),
            "lesson intro failed to load"
        );
        assert_eq!(similarity_key(&"x".repeat(500)).len(), 100);
    }

    #[test]
    fn test_exact_limit_counts_per_message() {
        let clock = Arc::new(MockClock::with_time(1_000_000));
        let limiter = ErrorRateLimiter::new(clock, 3, 100);

        assert!(limiter.should_capture("boom"));
        assert!(limiter.should_capture("boom"));
        assert!(limiter.should_capture("boom"));
        assert_eq!(limiter.check("boom"), RateDecision::ExactLimit);
        assert!(limiter.should_capture("other"));
    }

    #[test]
    fn test_cleanup_is_coarse_and_wholesale() {
        let clock = Arc::new(MockClock::with_time(0));
        let limiter = ErrorRateLimiter::new(clock.clone(), 1, 100);

        assert!(limiter.should_capture("a"));
        assert!(!limiter.should_capture("a"));

        // Exactly 60s is not yet "more than" the interval, and the minute
        // bucket changed, so only the bucket rollover admits it.
        clock.advance(Duration::from_secs(60));
        assert!(limiter.should_capture("a"));
        assert_eq!(limiter.tracked_keys(), (2, 2));

        // Past the interval everything is forgotten, including the count
        // admitted a moment ago in the same minute.
        clock.advance(Duration::from_millis(1));
        assert!(limiter.should_capture("a"));
        assert_eq!(limiter.tracked_keys(), (1, 1));
    }

    proptest! {
        #[test]
        fn prop_numbers_never_affect_similarity(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            prop_assert_eq!(
                similarity_key(&format!("Quiz {a} failed for user {b}")),
                similarity_key("Quiz 0 failed for user 0")
            );
        }
    }
}
