//! Ambient diagnostic scope: identity, tags and breadcrumbs
//!
//! One scope is shared by the handler, the performance monitor and the
//! session manager. Every captured error is enriched from it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_BREADCRUMB_CAPACITY: usize = 100;

/// Breadcrumbs included with each captured error
pub const ATTACHED_BREADCRUMBS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One entry of the diagnostic trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub message: String,
    pub level: BreadcrumbLevel,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub data: Map<String, Value>,
}

/// Point-in-time copy of a scope
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSnapshot {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub contexts: BTreeMap<String, Value>,
    pub breadcrumbs: Vec<Breadcrumb>,
}

#[derive(Debug, Default)]
struct ScopeState {
    user_id: Option<String>,
    session_id: Option<String>,
    tags: BTreeMap<String, String>,
    contexts: BTreeMap<String, Value>,
    breadcrumbs: VecDeque<Breadcrumb>,
}

#[derive(Debug)]
pub struct DiagnosticScope {
    state: RwLock<ScopeState>,
    capacity: usize,
}

impl Default for DiagnosticScope {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticScope {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BREADCRUMB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(ScopeState::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn set_user(&self, user_id: Option<String>) {
        self.state.write().user_id = user_id;
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.read().user_id.clone()
    }

    pub fn set_session(&self, session_id: Option<String>) {
        self.state.write().session_id = session_id;
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.read().session_id.clone()
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.write().tags.insert(key.into(), value.into());
    }

    pub fn remove_tag(&self, key: &str) {
        self.state.write().tags.remove(key);
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        self.state.read().tags.clone()
    }

    /// Attach a named structured context, replacing any previous one
    pub fn set_context(&self, name: impl Into<String>, value: Value) {
        self.state.write().contexts.insert(name.into(), value);
    }

    pub fn add_breadcrumb(
        &self,
        category: impl Into<String>,
        message: impl Into<String>,
        data: Map<String, Value>,
        level: BreadcrumbLevel,
    ) {
        let crumb = Breadcrumb {
            timestamp: Utc::now(),
            category: category.into(),
            message: message.into(),
            level,
            data,
        };
        let mut state = self.state.write();
        if state.breadcrumbs.len() >= self.capacity {
            state.breadcrumbs.pop_front();
        }
        state.breadcrumbs.push_back(crumb);
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.state.read().breadcrumbs.iter().cloned().collect()
    }

    /// The newest `n` breadcrumbs, oldest first
    pub fn recent_breadcrumbs(&self, n: usize) -> Vec<Breadcrumb> {
        let state = self.state.read();
        let skip = state.breadcrumbs.len().saturating_sub(n);
        state.breadcrumbs.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> ScopeSnapshot {
        let state = self.state.read();
        ScopeSnapshot {
            user_id: state.user_id.clone(),
            session_id: state.session_id.clone(),
            tags: state.tags.clone(),
            contexts: state.contexts.clone(),
            breadcrumbs: state.breadcrumbs.iter().cloned().collect(),
        }
    }

    /// Forget identity, tags and contexts; breadcrumbs survive
    pub fn clear_identity(&self) {
        let mut state = self.state.write();
        state.user_id = None;
        state.session_id = None;
        state.tags.clear();
        state.contexts.clear();
    }
}
