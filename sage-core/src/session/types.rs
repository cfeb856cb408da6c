//! Learning session data model

use crate::error::{SageError, SageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
    pub percentage: f64,
}

impl Progress {
    pub fn new(completed: u32, total: u32) -> Self {
        let mut progress = Self {
            completed,
            total,
            percentage: 0.0,
        };
        progress.recompute();
        progress
    }

    pub(crate) fn recompute(&mut self) {
        self.percentage = if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed) / f64::from(self.total) * 100.0
        };
    }
}

/// Running answer statistics for the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPerformance {
    /// Fraction of correct answers, 0.0 to 1.0
    pub accuracy: f64,
    /// Seconds spent answering
    pub time_spent: f64,
    pub attempts_count: u32,
}

impl LearningPerformance {
    pub(crate) fn record_answer(&mut self, correct: bool, time_spent: f64) {
        let old_count = f64::from(self.attempts_count);
        let hit = if correct { 1.0 } else { 0.0 };
        self.accuracy = (self.accuracy * old_count + hit) / (old_count + 1.0);
        self.time_spent += time_spent;
        self.attempts_count += 1;
    }
}

/// The single active learning context of a session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningContext {
    pub user_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lesson_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub learning_style: Option<String>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub performance: LearningPerformance,
}

impl LearningContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            module_id: None,
            lesson_id: None,
            question_id: None,
            learning_style: None,
            progress: Progress::default(),
            performance: LearningPerformance::default(),
        }
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_lesson(mut self, lesson_id: impl Into<String>) -> Self {
        self.lesson_id = Some(lesson_id.into());
        self
    }

    pub fn with_learning_style(mut self, style: impl Into<String>) -> Self {
        self.learning_style = Some(style.into());
        self
    }

    pub fn with_total_lessons(mut self, total: u32) -> Self {
        self.progress.total = total;
        self.progress.recompute();
        self
    }

    /// Tag values published to the diagnostic scope
    pub(crate) fn tags(&self) -> BTreeMap<&'static str, Option<&str>> {
        BTreeMap::from([
            ("moduleId", self.module_id.as_deref()),
            ("lessonId", self.lesson_id.as_deref()),
            ("questionId", self.question_id.as_deref()),
            ("learningStyle", self.learning_style.as_deref()),
        ])
    }
}

/// Shallow merge applied by `update_context`; `None` leaves a field alone
///
/// Aggregates are deliberately absent: only tracked events change them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextUpdate {
    pub module_id: Option<String>,
    pub lesson_id: Option<String>,
    pub question_id: Option<String>,
    pub learning_style: Option<String>,
    pub total_lessons: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningEventType {
    SessionStart,
    SessionEnd,
    QuestionAnswered,
    LessonCompleted,
    ModuleCompleted,
    ErrorOccurred,
    HelpRequested,
    HintUsed,
    QuizStart,
    QuizComplete,
    AssessmentStart,
    AssessmentComplete,
}

impl LearningEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningEventType::SessionStart => "session_start",
            LearningEventType::SessionEnd => "session_end",
            LearningEventType::QuestionAnswered => "question_answered",
            LearningEventType::LessonCompleted => "lesson_completed",
            LearningEventType::ModuleCompleted => "module_completed",
            LearningEventType::ErrorOccurred => "error_occurred",
            LearningEventType::HelpRequested => "help_requested",
            LearningEventType::HintUsed => "hint_used",
            LearningEventType::QuizStart => "quiz_start",
            LearningEventType::QuizComplete => "quiz_complete",
            LearningEventType::AssessmentStart => "assessment_start",
            LearningEventType::AssessmentComplete => "assessment_complete",
        }
    }
}

impl fmt::Display for LearningEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    #[serde(rename = "type")]
    pub event_type: LearningEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// Snapshot of a session, also returned when it ends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub user_id: String,
    pub session_id: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub event_count: usize,
    pub events_by_type: BTreeMap<LearningEventType, u64>,
    pub progress: Progress,
    pub performance: LearningPerformance,
    pub hints_used: u64,
    pub help_requests: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the event journal
    pub journal_capacity: usize,
    /// Capacity of the shared breadcrumb trail
    pub breadcrumb_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            journal_capacity: 100,
            breadcrumb_capacity: 100,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> SageResult<()> {
        if self.journal_capacity == 0 {
            return Err(SageError::configuration(
                "session",
                "journal_capacity must be at least 1",
            ));
        }
        if self.breadcrumb_capacity == 0 {
            return Err(SageError::configuration(
                "session",
                "breadcrumb_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_accuracy_mean() {
        let mut perf = LearningPerformance::default();
        perf.record_answer(true, 5.0);
        assert_eq!(perf, LearningPerformance { accuracy: 1.0, time_spent: 5.0, attempts_count: 1 });
        perf.record_answer(false, 3.0);
        assert_eq!(perf, LearningPerformance { accuracy: 0.5, time_spent: 8.0, attempts_count: 2 });
    }

    #[test]
    fn test_progress_with_no_total() {
        assert_eq!(Progress::new(3, 0).percentage, 0.0);
        assert_eq!(Progress::new(1, 4).percentage, 25.0);
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_value(LearningEventType::QuestionAnswered).unwrap();
        assert_eq!(json, "question_answered");
        assert_eq!(LearningEventType::HintUsed.to_string(), "hint_used");
    }
}
