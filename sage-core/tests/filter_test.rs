use sage_core::abstractions::MockClock;
use sage_core::error::RequestMeta;
use sage_core::filter::{
    AuthErrorFilter, CaptureFilter, ErrorFilter, ErrorFilterConfig, ErrorPattern,
    ErrorRateLimiter, FilterContext, FilterDecision, RateDecision, SuppressReason,
};
use sage_core::{AppError, ErrorCode};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_exact_message_cap() {
    let clock = Arc::new(MockClock::new());
    let limiter = ErrorRateLimiter::new(clock, 50, 1000);
    let admitted: Vec<bool> = (0..51).map(|_| limiter.should_capture("X not found")).collect();
    assert!(admitted[..50].iter().all(|a| *a));
    assert!(!admitted[50]);
}

#[test]
fn test_identical_messages_hit_similarity_cap_first_with_defaults() {
    let clock = Arc::new(MockClock::new());
    let limiter = ErrorRateLimiter::with_defaults(clock);
    let decisions: Vec<RateDecision> = (0..51).map(|_| limiter.check("X not found")).collect();

    assert!(decisions[..5].iter().all(|d| *d == RateDecision::Allowed));
    assert_eq!(decisions[5], RateDecision::SimilarLimit);
    assert_eq!(decisions[50], RateDecision::SimilarLimit);
    assert!(!limiter.should_capture("X not found"));
}

#[test]
fn test_rejected_calls_are_not_counted() {
    let clock = Arc::new(MockClock::new());
    let limiter = ErrorRateLimiter::new(clock, 2, 3);
    assert!(limiter.should_capture("lesson 1 failed"));
    assert!(limiter.should_capture("lesson 1 failed"));
    // Exact cap reached; these must not consume similarity budget
    assert_eq!(limiter.check("lesson 1 failed"), RateDecision::ExactLimit);
    assert_eq!(limiter.check("lesson 1 failed"), RateDecision::ExactLimit);
    // One similar slot left
    assert!(limiter.should_capture("lesson 2 failed"));
    assert_eq!(limiter.check("lesson 3 failed"), RateDecision::SimilarLimit);
}

#[test]
fn test_similar_message_cap() {
    let clock = Arc::new(MockClock::new());
    let limiter = ErrorRateLimiter::with_defaults(clock);
    let admitted: Vec<bool> = (1..=6)
        .map(|i| limiter.should_capture(&format!("User {i} not found")))
        .collect();
    assert_eq!(admitted, vec![true, true, true, true, true, false]);
}

#[test]
fn test_next_minute_resets_counts() {
    let clock = Arc::new(MockClock::new());
    let limiter = ErrorRateLimiter::new(clock.clone(), 1, 10);
    assert!(limiter.should_capture("quiz save failed"));
    assert!(!limiter.should_capture("quiz save failed"));
    clock.advance(Duration::from_secs(61));
    assert!(limiter.should_capture("quiz save failed"));
}

fn filter(config: ErrorFilterConfig) -> Arc<ErrorFilter> {
    Arc::new(ErrorFilter::new(config, Arc::new(MockClock::new())).unwrap())
}

#[test]
fn test_decision_order_and_redaction() {
    let config = ErrorFilterConfig {
        ignore_errors: vec![ErrorPattern::text("ResizeObserver")],
        allow_urls: vec![r"^https://app\.sage\.dev".to_string()],
        ..Default::default()
    };
    let filter = filter(config);

    let mut ignored = AppError::internal("ResizeObserver loop limit exceeded");
    assert_eq!(
        filter.evaluate(&mut ignored, &FilterContext::default()),
        FilterDecision::Suppress(SuppressReason::IgnoredMessage)
    );

    let meta = RequestMeta::new().with_url("chrome-extension://abc/script.js");
    let mut extension = AppError::internal("boom");
    assert_eq!(
        filter.evaluate(&mut extension, &FilterContext::from_request(&meta)),
        FilterDecision::Suppress(SuppressReason::DeniedUrl)
    );

    let meta = RequestMeta::new().with_url("https://elsewhere.example/page");
    let mut foreign = AppError::internal("boom again");
    assert_eq!(
        filter.evaluate(&mut foreign, &FilterContext::from_request(&meta)),
        FilterDecision::Suppress(SuppressReason::NotAllowedUrl)
    );

    let meta = RequestMeta::new()
        .with_url("https://app.sage.dev/lesson/3")
        .with_user_agent("Mozilla/5.0 (compatible; Googlebot/2.1)");
    let mut crawler = AppError::internal("render failed");
    assert_eq!(
        filter.evaluate(&mut crawler, &FilterContext::from_request(&meta)),
        FilterDecision::Suppress(SuppressReason::Bot)
    );

    let meta = RequestMeta::new().with_url("https://app.sage.dev/lesson/3");
    let mut leaky = AppError::new(ErrorCode::DatabaseError, "insert failed for ana@example.org");
    assert!(filter
        .evaluate(&mut leaky, &FilterContext::from_request(&meta))
        .is_capture());
    assert!(!leaky.message.contains("ana@example.org"));
    assert!(leaky.message.starts_with("insert failed for"));
}

#[test]
fn test_localhost_suppression_is_opt_in() {
    let meta = RequestMeta::new().with_url("http://localhost:3000/dashboard");

    let permissive = filter(ErrorFilterConfig::default());
    let mut error = AppError::internal("dev crash");
    assert!(permissive
        .evaluate(&mut error, &FilterContext::from_request(&meta))
        .is_capture());

    let strict = filter(ErrorFilterConfig {
        ignore_localhost: true,
        ..Default::default()
    });
    let mut error = AppError::internal("dev crash 2");
    assert_eq!(
        strict.evaluate(&mut error, &FilterContext::from_request(&meta)),
        FilterDecision::Suppress(SuppressReason::Localhost)
    );
}

#[test]
fn test_auth_filter_drops_routine_failures() {
    let auth = AuthErrorFilter::new(filter(ErrorFilterConfig::default()));
    let mut routine = AppError::new(ErrorCode::AuthenticationError, "Invalid credentials");
    assert!(!auth
        .evaluate(&mut routine, &FilterContext::default())
        .is_capture());

    let mut unusual = AppError::new(ErrorCode::AuthenticationError, "JWKS endpoint unreachable");
    assert!(auth
        .evaluate(&mut unusual, &FilterContext::default())
        .is_capture());
}
