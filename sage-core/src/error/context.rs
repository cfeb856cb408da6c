//! Context attached to every normalized error
//!
//! [`ErrorContext`] is assembled once, at the normalization boundary, and is
//! read-only after it has been attached to an [`AppError`](super::AppError).
//! [`RequestMeta`] describes the transport request an error occurred in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where and on whose behalf an error happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    component: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
    metadata: Map<String, Value>,
    timestamp: DateTime<Utc>,
    stack: Option<String>,
}

impl ErrorContext {
    /// Start building a context stamped with the current time
    pub fn builder() -> ErrorContextBuilder {
        ErrorContextBuilder::default()
    }

    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Start a new context derived from this one, keeping its timestamp
    pub fn to_builder(&self) -> ErrorContextBuilder {
        ErrorContextBuilder {
            component: self.component.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            request_id: self.request_id.clone(),
            metadata: self.metadata.clone(),
            stack: self.stack.clone(),
            timestamp: Some(self.timestamp),
        }
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        ErrorContextBuilder::default().build()
    }
}

/// Builder for [`ErrorContext`]
#[derive(Debug, Default)]
pub struct ErrorContextBuilder {
    component: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
    metadata: Map<String, Value>,
    stack: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl ErrorContextBuilder {
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Add one metadata entry, replacing any previous value for `key`
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a whole map of metadata; later entries win
    pub fn extend_metadata(mut self, entries: Map<String, Value>) -> Self {
        self.metadata.extend(entries);
        self
    }

    /// Fill identity fields that are still unset
    pub fn fill_identity(
        mut self,
        user_id: Option<&str>,
        session_id: Option<&str>,
        request_id: Option<&str>,
    ) -> Self {
        if self.user_id.is_none() {
            self.user_id = user_id.map(str::to_string);
        }
        if self.session_id.is_none() {
            self.session_id = session_id.map(str::to_string);
        }
        if self.request_id.is_none() {
            self.request_id = request_id.map(str::to_string);
        }
        self
    }

    pub fn build(self) -> ErrorContext {
        ErrorContext {
            component: self.component,
            user_id: self.user_id,
            session_id: self.session_id,
            request_id: self.request_id,
            metadata: self.metadata,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            stack: self.stack,
        }
    }
}

/// Request metadata available at the normalization boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    /// Full URL, used by URL allow/deny rules and localhost detection
    pub url: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// URL used for filtering: the full URL if known, else the path
    pub fn effective_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.path.as_deref())
    }
}
