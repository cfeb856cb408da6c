use sage_core::abstractions::MockClock;
use sage_core::config::SageConfig;
use sage_core::handler::{ChannelExporter, HandlerConfig};
use sage_core::metrics::names;
use sage_core::monitoring::observer::NoopObserver;
use sage_core::session::{ContextUpdate, LearningContext, LearningEventType};
use sage_core::{AppError, DiagnosticsRuntime, ErrorCode, FilterProfile};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;

fn runtime(clock: Arc<MockClock>) -> DiagnosticsRuntime {
    DiagnosticsRuntime::builder(SageConfig::default())
        .clock(clock)
        .observer(Arc::new(NoopObserver))
        .filter_profile(FilterProfile::Learning)
        .build()
        .unwrap()
}

#[test]
fn test_learning_session_lifecycle() {
    let clock = Arc::new(MockClock::new());
    let rt = runtime(clock.clone());
    let sessions = rt.sessions();

    sessions.set_context(
        LearningContext::new("learner-7", "session-42")
            .with_module("fractions")
            .with_learning_style("visual")
            .with_total_lessons(2),
    );
    assert_eq!(rt.scope().user_id().as_deref(), Some("learner-7"));
    assert_eq!(rt.scope().tags()["moduleId"], "fractions");

    sessions.track_event(
        LearningEventType::QuestionAnswered,
        Some(json!({"correct": true, "timeSpent": 5})),
    );
    sessions.track_event(
        LearningEventType::QuestionAnswered,
        Some(json!({"correct": false, "timeSpent": 3})),
    );
    let performance = sessions.context().unwrap().performance;
    assert_eq!(performance.accuracy, 0.5);
    assert_eq!(performance.attempts_count, 2);
    assert_eq!(performance.time_spent, 8.0);

    sessions
        .update_context(ContextUpdate {
            lesson_id: Some("lesson-2".into()),
            ..Default::default()
        })
        .unwrap();
    sessions.track_event(LearningEventType::LessonCompleted, None);
    sessions.track_event(LearningEventType::HelpRequested, None);
    clock.advance(Duration::from_secs(300));

    let stats = sessions.end_session().unwrap();
    assert_eq!(stats.duration, Duration::from_secs(300));
    assert_eq!(stats.progress.percentage, 50.0);
    assert_eq!(stats.help_requests, 1);
    assert_eq!(stats.events_by_type[&LearningEventType::QuestionAnswered], 2);

    assert_eq!(rt.scope().user_id(), None);
    assert_eq!(rt.metrics().get_counter(names::SESSIONS_ENDED), 1);
}

#[test]
fn test_errors_are_tagged_with_the_session() {
    let clock = Arc::new(MockClock::new());
    let rt = runtime(clock);
    rt.sessions()
        .set_context(LearningContext::new("learner-1", "session-1").with_module("algebra"));

    let mut extra = Map::new();
    extra.insert("questionId".into(), json!("q-9"));
    let id = rt
        .sessions()
        .capture_error(
            AppError::new(ErrorCode::InvalidLearningState, "answer submitted twice"),
            extra,
        )
        .unwrap();

    let journal = rt.sessions().journal();
    let last = journal.last().unwrap();
    assert_eq!(last.event_type, LearningEventType::ErrorOccurred);
    assert_eq!(last.data.as_ref().unwrap()["errorId"], json!(id));
    assert_eq!(
        rt.metrics().get_counter("errors.captured{INVALID_LEARNING_STATE}"),
        1
    );
    let crumbs = rt.scope().breadcrumbs();
    assert!(crumbs.iter().any(|c| c.message == "Learning error occurred"));
}

#[tokio::test]
async fn test_session_server_errors_reach_the_exporter_in_production() {
    let (exporter, mut rx) = ChannelExporter::new(8);
    let mut config = SageConfig::default();
    config.environment = sage_core::Environment::Production;
    assert_eq!(config.handler_config(), HandlerConfig::production());

    let rt = DiagnosticsRuntime::builder(config)
        .observer(Arc::new(NoopObserver))
        .exporter(Arc::new(exporter))
        .build()
        .unwrap();
    rt.sessions().set_context(LearningContext::new("u-1", "s-1"));
    rt.sessions()
        .capture_error(AppError::new(ErrorCode::AiServiceError, "tutor model down"), Map::new())
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.error.code, ErrorCode::AiServiceError);
    assert_eq!(event.user_id.as_deref(), Some("u-1"));
    assert_eq!(event.session_id.as_deref(), Some("s-1"));
}
