//! Learning session context tracking
//!
//! A [`LearningSessionManager`] holds at most one active [`LearningContext`]
//! and a capped journal of [`LearningEvent`]s. It publishes the learner's
//! identity and position to the shared [`DiagnosticScope`], so errors and
//! performance samples captured anywhere are tied to the session.

pub mod scope;
pub mod types;

pub use scope::{Breadcrumb, BreadcrumbLevel, DiagnosticScope, ScopeSnapshot};
pub use types::{
    ContextUpdate, LearningContext, LearningEvent, LearningEventType, LearningPerformance,
    Progress, SessionConfig, SessionStats,
};

use crate::abstractions::time::{Clock, Instant, SystemClock};
use crate::error::{AppError, RequestMeta, SageError, SageResult};
use crate::handler::{ErrorCapture, ErrorId};
use crate::metrics::{names, MetricsRegistry};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "learning-session";
const LEARNING_CONTEXT: &str = "learning";

#[derive(Debug, Default)]
struct SessionState {
    context: Option<LearningContext>,
    journal: VecDeque<LearningEvent>,
    started_at: Option<Instant>,
    counts: BTreeMap<LearningEventType, u64>,
    /// Events tracked this session, including those evicted from the journal
    tracked: usize,
}

pub struct LearningSessionManager {
    config: SessionConfig,
    scope: Arc<DiagnosticScope>,
    capture: Option<Arc<dyn ErrorCapture>>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    state: Mutex<SessionState>,
}

impl fmt::Debug for LearningSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LearningSessionManager")
            .field("config", &self.config)
            .field("active", &state.context.is_some())
            .field("journal", &state.journal.len())
            .finish_non_exhaustive()
    }
}

impl LearningSessionManager {
    pub fn new(config: SessionConfig, scope: Arc<DiagnosticScope>) -> Self {
        Self {
            config,
            scope,
            capture: None,
            clock: Arc::new(SystemClock::new()),
            metrics: MetricsRegistry::new(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn with_capture(mut self, capture: Arc<dyn ErrorCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn context(&self) -> Option<LearningContext> {
        self.state.lock().context.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().context.is_some()
    }

    /// Journal entries, oldest first
    pub fn journal(&self) -> Vec<LearningEvent> {
        self.state.lock().journal.iter().cloned().collect()
    }

    /// Replace the active context and start the session clock
    pub fn set_context(&self, context: LearningContext) {
        let now = self.clock.now();
        let previous = {
            let mut state = self.state.lock();
            let previous = state.context.take();
            *state = SessionState {
                context: Some(context.clone()),
                started_at: Some(now),
                ..SessionState::default()
            };
            previous
        };
        if let Some(previous) = previous {
            warn!(
                previous_session = %previous.session_id,
                "Replacing a learning session that was never ended"
            );
        }

        self.scope.set_user(Some(context.user_id.clone()));
        self.scope.set_session(Some(context.session_id.clone()));
        for (key, value) in context.tags() {
            match value {
                Some(v) => self.scope.set_tag(key, v),
                None => self.scope.remove_tag(key),
            }
        }
        self.publish_context(&context);
        self.metrics.increment_counter(names::SESSIONS_STARTED);

        info!(
            user_id = %context.user_id,
            session_id = %context.session_id,
            "Learning session started"
        );
        self.track_event(
            LearningEventType::SessionStart,
            Some(json!({
                "moduleId": context.module_id,
                "lessonId": context.lesson_id,
                "learningStyle": context.learning_style,
            })),
        );
    }

    /// Merge `update` into the active context; only changed tags are republished
    pub fn update_context(&self, update: ContextUpdate) -> SageResult<()> {
        let (before, after) = {
            let mut state = self.state.lock();
            let context = state.context.as_mut().ok_or(SageError::NoActiveSession)?;
            let before = context.clone();
            if let Some(v) = update.module_id {
                context.module_id = Some(v);
            }
            if let Some(v) = update.lesson_id {
                context.lesson_id = Some(v);
            }
            if let Some(v) = update.question_id {
                context.question_id = Some(v);
            }
            if let Some(v) = update.learning_style {
                context.learning_style = Some(v);
            }
            if let Some(total) = update.total_lessons {
                context.progress.total = total;
                context.progress.recompute();
            }
            (before, context.clone())
        };

        let old_tags = before.tags();
        for (key, value) in after.tags() {
            if old_tags.get(key).copied().flatten() != value {
                match value {
                    Some(v) => self.scope.set_tag(key, v),
                    None => self.scope.remove_tag(key),
                }
            }
        }
        if before != after {
            self.publish_context(&after);
        }
        Ok(())
    }

    /// Append an event and update the aggregates it affects
    ///
    /// Without an active session this only logs a warning and returns `false`.
    pub fn track_event(&self, event_type: LearningEventType, data: Option<Value>) -> bool {
        let event = LearningEvent {
            event_type,
            timestamp: Utc::now(),
            data,
        };
        let capacity = self.config.journal_capacity.max(1);

        let context = {
            let mut state = self.state.lock();
            let Some(context) = state.context.as_mut() else {
                warn!(event = %event_type, "No active learning session, event dropped");
                return false;
            };
            apply_event(context, &event);
            let context = context.clone();

            *state.counts.entry(event_type).or_insert(0) += 1;
            state.tracked += 1;
            while state.journal.len() >= capacity {
                state.journal.pop_front();
            }
            state.journal.push_back(event.clone());
            context
        };

        match event_type {
            LearningEventType::QuestionAnswered | LearningEventType::LessonCompleted => {
                self.publish_context(&context);
            }
            LearningEventType::ModuleCompleted => {
                self.breadcrumb(&context, &event, "Module completed", BreadcrumbLevel::Info);
            }
            LearningEventType::ErrorOccurred => {
                self.breadcrumb(&context, &event, "Learning error occurred", BreadcrumbLevel::Error);
            }
            _ => {}
        }
        debug!(event = %event_type, session_id = %context.session_id, "Learning event tracked");
        true
    }

    /// Report an error on behalf of the active session
    ///
    /// Returns `None`, after a warning, when no session is active.
    pub fn capture_error(&self, error: AppError, extra: Map<String, Value>) -> Option<ErrorId> {
        let Some(context) = self.context() else {
            warn!(code = %error.code(), "No active learning session, error not captured");
            return None;
        };

        let mut metadata = extra;
        metadata.insert("progress".into(), json!(context.progress));
        if let Some(style) = &context.learning_style {
            metadata.insert("learningStyle".into(), json!(style));
        }
        if let Some(module) = &context.module_id {
            metadata.insert("moduleId".into(), json!(module));
        }
        if let Some(lesson) = &context.lesson_id {
            metadata.insert("lessonId".into(), json!(lesson));
        }

        let error_context = error
            .context()
            .to_builder()
            .component(COMPONENT)
            .fill_identity(Some(&context.user_id), Some(&context.session_id), None)
            .extend_metadata(metadata)
            .build();
        let error = error.with_context(error_context);
        let code = error.code();
        let message = error.message.clone();

        let error_id = match &self.capture {
            Some(capture) => {
                let meta = RequestMeta::new().with_user_id(context.user_id.as_str());
                capture.capture(error, &meta)
            }
            None => {
                let id = ErrorId::new();
                error!(error_id = %id, code = %code, "[ERROR] {}", message);
                id
            }
        };

        self.track_event(
            LearningEventType::ErrorOccurred,
            Some(json!({
                "errorId": error_id,
                "code": code,
                "message": message,
            })),
        );
        Some(error_id)
    }

    pub fn session_stats(&self) -> Option<SessionStats> {
        let now = self.clock.now();
        let state = self.state.lock();
        let context = state.context.as_ref()?;
        let count = |t: LearningEventType| state.counts.get(&t).copied().unwrap_or(0);
        Some(SessionStats {
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            duration: state
                .started_at
                .map(|start| start.elapsed(now))
                .unwrap_or_default(),
            event_count: state.tracked,
            events_by_type: state.counts.clone(),
            progress: context.progress,
            performance: context.performance,
            hints_used: count(LearningEventType::HintUsed),
            help_requests: count(LearningEventType::HelpRequested),
            errors: count(LearningEventType::ErrorOccurred),
        })
    }

    /// Record `session_end`, then forget the context, journal and timer
    pub fn end_session(&self) -> Option<SessionStats> {
        let stats = self.session_stats()?;
        self.track_event(
            LearningEventType::SessionEnd,
            Some(json!({
                "durationMs": stats.duration.as_millis() as u64,
                "eventCount": stats.event_count + 1,
                "questionsAnswered": stats.performance.attempts_count,
                "lessonsCompleted": stats.progress.completed,
                "accuracy": stats.performance.accuracy,
            })),
        );
        info!(
            user_id = %stats.user_id,
            session_id = %stats.session_id,
            duration = ?stats.duration,
            events = stats.event_count + 1,
            accuracy = stats.performance.accuracy,
            "Learning session ended"
        );

        *self.state.lock() = SessionState::default();
        self.scope.clear_identity();
        self.metrics.increment_counter(names::SESSIONS_ENDED);
        Some(stats)
    }

    fn publish_context(&self, context: &LearningContext) {
        self.scope.set_context(
            LEARNING_CONTEXT,
            json!({
                "sessionId": context.session_id,
                "moduleId": context.module_id,
                "lessonId": context.lesson_id,
                "learningStyle": context.learning_style,
                "progress": context.progress,
                "performance": context.performance,
            }),
        );
    }

    fn breadcrumb(
        &self,
        context: &LearningContext,
        event: &LearningEvent,
        message: &str,
        level: BreadcrumbLevel,
    ) {
        let mut data = match &event.data {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => Map::from_iter([("data".to_string(), other.clone())]),
            None => Map::new(),
        };
        data.insert("sessionId".into(), json!(context.session_id));
        if let Some(module) = &context.module_id {
            data.entry("moduleId").or_insert_with(|| json!(module));
        }
        data.insert("progress".into(), json!(context.progress));
        self.scope.add_breadcrumb(LEARNING_CONTEXT, message, data, level);
    }
}

fn apply_event(context: &mut LearningContext, event: &LearningEvent) {
    let data = event.data.as_ref();
    match event.event_type {
        LearningEventType::QuestionAnswered => {
            let correct = data
                .and_then(|d| d.get("correct"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let time_spent = data
                .and_then(|d| d.get("timeSpent"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if let Some(question) = data.and_then(|d| d.get("questionId")).and_then(Value::as_str) {
                context.question_id = Some(question.to_string());
            }
            context.performance.record_answer(correct, time_spent);
        }
        LearningEventType::LessonCompleted => {
            context.progress.completed += 1;
            context.progress.recompute();
        }
        _ => {}
    }
}
