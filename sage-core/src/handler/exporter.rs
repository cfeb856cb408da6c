//! Diagnostics exporter seam
//!
//! The handler only ever calls [`DiagnosticsExporter::report`]. Concrete
//! backends (APM, error trackers) live outside this crate; the ones here
//! cover tests, local runs and log-based deployments.

use super::ErrorId;
use crate::error::{AppError, ErrorCode, SageError, SageResult};
use crate::metrics::{names, MetricsRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Error summary sent to the exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedError {
    pub code: ErrorCode,
    pub message: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
}

/// Payload of one `report` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEvent {
    pub service: String,
    pub error_id: ErrorId,
    pub error: ExportedError,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub tags: BTreeMap<String, String>,
}

impl ExportEvent {
    pub fn from_error(service: &str, error_id: ErrorId, error: &AppError) -> Self {
        Self {
            service: service.to_string(),
            error_id,
            error: ExportedError {
                code: error.code(),
                message: error.message.clone(),
                status_code: error.status_code(),
                timestamp: error.timestamp(),
                request_id: error.request_id.clone(),
            },
            user_id: error
                .user_id
                .clone()
                .or_else(|| error.context().user_id().map(str::to_string)),
            session_id: error.context().session_id().map(str::to_string),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

#[async_trait]
pub trait DiagnosticsExporter: Send + Sync + Debug {
    async fn report(&self, event: ExportEvent) -> SageResult<()>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExporter;

#[async_trait]
impl DiagnosticsExporter for NoopExporter {
    async fn report(&self, _event: ExportEvent) -> SageResult<()> {
        Ok(())
    }
}

/// Writes each event as a structured log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExporter;

#[async_trait]
impl DiagnosticsExporter for TracingExporter {
    async fn report(&self, event: ExportEvent) -> SageResult<()> {
        let payload = serde_json::to_string(&event)?;
        info!(
            target: "sage_core::export",
            error_id = %event.error_id,
            code = %event.error.code,
            service = %event.service,
            payload = %payload,
            "Diagnostics event exported"
        );
        Ok(())
    }
}

/// Forwards events into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelExporter {
    tx: mpsc::Sender<ExportEvent>,
}

impl ChannelExporter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExportEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DiagnosticsExporter for ChannelExporter {
    async fn report(&self, event: ExportEvent) -> SageResult<()> {
        self.tx.send(event).await.map_err(|_| SageError::Internal {
            message: "diagnostics channel closed".to_string(),
        })
    }
}

/// Hand `event` to `exporter` without waiting for it
///
/// Needs a tokio runtime; without one the event is dropped.
pub(crate) fn dispatch(
    exporter: &Arc<dyn DiagnosticsExporter>,
    event: ExportEvent,
    metrics: &MetricsRegistry,
) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            debug!(error_id = %event.error_id, "No async runtime, dropping diagnostics export");
            return;
        }
    };
    let exporter = Arc::clone(exporter);
    let metrics = metrics.clone();
    handle.spawn(async move {
        let error_id = event.error_id;
        match exporter.report(event).await {
            Ok(()) => metrics.increment_counter(names::ERRORS_EXPORTED),
            Err(e) => warn!(error_id = %error_id, "Failed to export diagnostics event: {}", e),
        }
    });
}
