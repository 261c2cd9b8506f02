//! Operation tracking.
//!
//! A [`Tracker`] is chosen once when the host is built and injected into the
//! components that report spans. Components never consult configuration to decide
//! whether to track; a disabled setup simply injects [`NoopTracker`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::config::TrackingSettings;
use crate::errors::AgentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    General,
    Tool,
    Llm,
}

/// A finished span
#[derive(Debug, Clone, Serialize)]
pub struct TrackRecord {
    pub id: Uuid,
    pub name: String,
    pub kind: TrackKind,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
}

pub trait Tracker: Send + Sync {
    /// Whether spans should be built at all
    fn enabled(&self) -> bool {
        true
    }

    fn record(&self, record: TrackRecord);
}

pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn enabled(&self) -> bool {
        false
    }

    fn record(&self, _record: TrackRecord) {}
}

/// Emits one structured `tracing` event per span
pub struct LogTracker {
    project: String,
}

impl LogTracker {
    pub fn new<S: Into<String>>(project: S) -> Self {
        Self {
            project: project.into(),
        }
    }
}

impl Tracker for LogTracker {
    fn record(&self, record: TrackRecord) {
        tracing::info!(
            target: "analyst::tracking",
            project = %self.project,
            span = %record.name,
            kind = ?record.kind,
            id = %record.id,
            started_at = %record.started_at,
            duration_ms = record.duration_ms as u64,
            input = %record.input,
            output = %record.output.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            error = record.error.as_deref().unwrap_or(""),
            "span finished"
        );
    }
}

/// Build the tracker selected by the tracking settings
pub fn from_settings(settings: &TrackingSettings) -> Arc<dyn Tracker> {
    if settings.enabled {
        Arc::new(LogTracker::new(settings.project.clone()))
    } else {
        Arc::new(NoopTracker)
    }
}

/// Run `operation` and report it to `tracker` as a span named `name`
pub async fn track<T, F>(
    tracker: &dyn Tracker,
    name: &str,
    kind: TrackKind,
    input: Value,
    operation: F,
) -> AgentResult<T>
where
    T: Serialize,
    F: Future<Output = AgentResult<T>>,
{
    if !tracker.enabled() {
        return operation.await;
    }

    let started_at = Utc::now();
    let start = Instant::now();
    let result = operation.await;

    let (output, error) = match &result {
        Ok(value) => (serde_json::to_value(value).ok(), None),
        Err(e) => (None, Some(e.to_string())),
    };

    tracker.record(TrackRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        kind,
        input,
        output,
        error,
        started_at,
        duration_ms: start.elapsed().as_millis(),
    });

    result
}
