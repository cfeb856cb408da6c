use sage_core::abstractions::MockClock;
use sage_core::error::{ErrorDetail, RequestMeta};
use sage_core::filter::{ApiErrorFilter, ErrorFilter, ErrorFilterConfig};
use sage_core::handler::{ChannelExporter, ErrorHandler, HandlerConfig};
use sage_core::metrics::{names, MetricsRegistry};
use sage_core::{AppError, DomainError, ErrorCode};
use std::sync::Arc;
use std::time::Duration;

fn handler(config: HandlerConfig) -> (ErrorHandler, MetricsRegistry) {
    let base = Arc::new(
        ErrorFilter::new(ErrorFilterConfig::default(), Arc::new(MockClock::new())).unwrap(),
    );
    let metrics = MetricsRegistry::new();
    let handler = ErrorHandler::new(config, Arc::new(ApiErrorFilter::new(base)))
        .with_metrics(metrics.clone());
    (handler, metrics)
}

fn meta() -> RequestMeta {
    RequestMeta::new()
        .with_request_id("req-1")
        .with_method("POST")
        .with_path("/api/quiz/submit")
}

#[test]
fn test_validation_response_shape() {
    let (handler, metrics) = handler(HandlerConfig::production());
    let error = DomainError::validation(
        "answer is required",
        vec![ErrorDetail::field("answer", "must not be empty")],
    );

    let response = handler.handle_error(&error, &meta());
    assert_eq!(response.status.as_u16(), 400);
    assert!(!response.captured);
    assert_eq!(metrics.get_counter(names::ERRORS_SUPPRESSED), 1);

    let body: serde_json::Value = serde_json::from_str(&response.body_json()).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "Please check your input and try again.");
    assert_eq!(body["error"]["requestId"], "req-1");
    assert_eq!(body["error"]["details"][0]["field"], "answer");
    assert!(body["error"].get("stack").is_none());
}

#[test]
fn test_rate_limit_sets_retry_after_and_cors() {
    let (handler, _) = handler(HandlerConfig::development());
    let error: AppError = DomainError::rate_limit("slow down", Some(Duration::from_secs(30))).into();

    let http = handler.handle_app_error(error, &meta()).into_http();
    assert_eq!(http.status().as_u16(), 429);
    assert_eq!(http.headers()["retry-after"], "30");
    assert_eq!(http.headers()["access-control-allow-origin"], "*");
    assert_eq!(http.headers()["content-type"], "application/json");
}

#[test]
fn test_production_hides_server_internals() {
    let (handler, metrics) = handler(HandlerConfig::production());
    let error = AppError::new(ErrorCode::DatabaseError, "deadlock on table learner_progress")
        .with_detail(ErrorDetail::new("lock wait timeout"));

    let response = handler.handle_app_error(error, &meta());
    assert!(response.captured);
    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(
        response.body.error.message,
        ErrorCode::DatabaseError.user_message()
    );
    assert!(response.body.error.details.is_none());
    assert_eq!(metrics.get_counter("errors.captured{DATABASE_ERROR}"), 1);
}

#[test]
fn test_development_exposes_raw_message() {
    let (handler, _) = handler(HandlerConfig::development());
    let response = handler.handle_app_error(AppError::internal("grader crashed"), &meta());
    assert_eq!(response.body.error.message, "grader crashed");
}

#[tokio::test]
async fn test_only_admitted_server_errors_are_exported() {
    let (exporter, mut rx) = ChannelExporter::new(8);
    let (handler, metrics) = handler(HandlerConfig::production());
    let handler = handler.with_exporter(Arc::new(exporter));

    handler.handle_app_error(DomainError::not_found("Lesson").into(), &meta());
    let response = handler.handle_app_error(
        AppError::new(ErrorCode::ExternalServiceError, "speech API down"),
        &meta(),
    );

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.error_id, response.error_id);
    assert_eq!(event.error.code, ErrorCode::ExternalServiceError);
    assert!(rx.try_recv().is_err());

    for _ in 0..10 {
        if metrics.get_counter(names::ERRORS_EXPORTED) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(metrics.get_counter(names::ERRORS_EXPORTED), 1);
}

#[tokio::test]
async fn test_wrap_turns_panics_into_responses() {
    let (handler, _) = handler(HandlerConfig::development());

    let ok: Result<u32, _> = handler
        .wrap(&meta(), async { Ok::<_, AppError>(3) })
        .await;
    assert_eq!(ok.unwrap(), 3);

    let panicked: Result<u32, _> = handler
        .wrap(&meta(), async {
            if true {
                panic!("index out of bounds");
            }
            Ok::<_, AppError>(0)
        })
        .await;
    let response = panicked.unwrap_err();
    assert_eq!(response.code(), ErrorCode::InternalServerError);
    assert!(response.body.error.message.contains("index out of bounds"));
}
