//! Telemetry emitted at task and workflow lifecycle points.
//!
//! Sinks are fire-and-forget: `emit` never blocks the engine. The channel
//! sink drops emissions when its buffer is full and counts the drops.

use crate::result::{TaskExecutionResult, TaskStatus};
use aureus_core::{TaskId, WorkflowId};
use aureus_plan::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Lifecycle point a telemetry event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventType {
    /// A task started
    StepStart,
    /// A task reached a terminal status
    StepEnd,
    /// The runner invoked a tool
    ToolCall,
    /// A gate ruled on a commit
    CrvResult,
    /// The guard ruled on an action
    PolicyCheck,
    /// A commit was accepted
    SnapshotCommit,
    /// A commit was blocked and not applied
    Rollback,
    /// Anything else
    Custom,
}

/// One telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: TelemetryEventType,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Workflow identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    /// Task identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Task type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    /// Caller's correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Event payload
    pub data: Value,
    /// Free-form tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl TelemetryEvent {
    /// Create an event stamped now
    #[must_use]
    pub fn new(event_type: TelemetryEventType, data: Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            workflow_id: None,
            task_id: None,
            task_type: None,
            correlation_id: None,
            data,
            tags: None,
        }
    }

    /// Attach the workflow
    #[must_use]
    pub fn for_workflow(mut self, workflow: &WorkflowId, correlation_id: Option<&str>) -> Self {
        self.workflow_id = Some(workflow.clone());
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }

    /// Attach the task
    #[must_use]
    pub fn for_task(mut self, task: &TaskId, task_type: TaskType) -> Self {
        self.task_id = Some(task.clone());
        self.task_type = Some(task_type);
        self
    }
}

/// A named measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    pub name: String,
    /// Value
    pub value: f64,
    /// When it was taken
    pub timestamp: DateTime<Utc>,
    /// Free-form tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Metric {
    /// Create a metric stamped now
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            tags: None,
        }
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A timed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Span identifier
    pub id: String,
    /// Trace identifier (the run id)
    pub trace_id: String,
    /// Enclosing span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Span name
    pub name: String,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// End time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Free-form tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Span {
    /// Open a span
    #[must_use]
    pub fn start(trace_id: impl Into<String>, parent_id: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            id: format!("span_{}", uuid::Uuid::new_v4().simple()),
            trace_id: trace_id.into(),
            parent_id: parent_id.map(str::to_string),
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            tags: None,
        }
    }

    /// Close the span
    #[must_use]
    pub fn finish(mut self) -> Self {
        let end = Utc::now();
        self.duration = Some((end - self.start_time).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0);
        self.end_time = Some(end);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Anything a sink can receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Emission {
    /// A lifecycle event
    Event(TelemetryEvent),
    /// A measurement
    Metric(Metric),
    /// A closed span
    Span(Span),
}

/// Receives telemetry; must not block
pub trait TelemetrySink: Send + Sync {
    /// Deliver one emission
    fn emit(&self, emission: Emission);
}

/// Writes emissions to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, emission: Emission) {
        match emission {
            Emission::Event(event) => tracing::debug!(
                target: "aureus::telemetry",
                kind = ?event.event_type,
                workflow = ?event.workflow_id,
                task = ?event.task_id,
                data = %event.data,
                "event"
            ),
            Emission::Metric(metric) => tracing::debug!(
                target: "aureus::telemetry",
                name = %metric.name,
                value = metric.value,
                "metric"
            ),
            Emission::Span(span) => tracing::trace!(
                target: "aureus::telemetry",
                name = %span.name,
                trace = %span.trace_id,
                duration_ms = span.duration,
                "span"
            ),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _emission: Emission) {}
}

/// Forwards emissions over a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Emission>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink buffering up to `capacity` emissions
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Emission>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emissions dropped because the buffer was full or closed
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&self, emission: Emission) {
        if self.tx.try_send(emission).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Counters for one workflow run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Tasks that succeeded
    pub tasks_succeeded: u64,
    /// Tasks that failed
    pub tasks_failed: u64,
    /// Tasks that never ran
    pub tasks_skipped: u64,
    /// Tool invocations
    pub attempts: u64,
    /// Invocations beyond the first per task
    pub retries: u64,
    /// Compensating calls made
    pub compensations: u64,
    /// Recovery strategies applied
    pub recoveries: u64,
    /// Results served from the idempotency cache
    pub cache_hits: u64,
}

impl Metrics {
    /// Create empty metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one task result
    pub fn record(&mut self, result: &TaskExecutionResult) {
        match result.status {
            TaskStatus::Success => self.tasks_succeeded += 1,
            TaskStatus::Failed => self.tasks_failed += 1,
            TaskStatus::Skipped => self.tasks_skipped += 1,
        }
        let attempts = u64::from(result.attempts);
        self.attempts += attempts;
        self.retries += attempts.saturating_sub(1);
        self.compensations += u64::from(result.compensation.is_some());
        self.recoveries += result.recovery.len() as u64;
        self.cache_hits += u64::from(result.cached);
    }

    /// Tasks counted
    #[must_use]
    pub fn tasks(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed + self.tasks_skipped
    }

    /// Fraction of counted tasks that succeeded (1.0 when none)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.tasks() == 0 {
            return 1.0;
        }
        self.tasks_succeeded as f64 / self.tasks() as f64
    }

    /// The counters as metrics
    #[must_use]
    pub fn to_metrics(&self, workflow: &WorkflowId) -> Vec<Metric> {
        [
            ("tasks.succeeded", self.tasks_succeeded),
            ("tasks.failed", self.tasks_failed),
            ("tasks.skipped", self.tasks_skipped),
            ("tasks.attempts", self.attempts),
            ("tasks.retries", self.retries),
            ("tasks.compensations", self.compensations),
            ("tasks.recoveries", self.recoveries),
            ("tasks.cache_hits", self.cache_hits),
        ]
        .into_iter()
        .map(|(name, value)| Metric::new(name, value as f64).with_tag("workflow_id", workflow.as_str()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(2);
        for _ in 0..5 {
            sink.emit(Emission::Metric(Metric::new("m", 1.0)));
        }
        assert_eq!(sink.dropped(), 3);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let event = TelemetryEvent::new(TelemetryEventType::CrvResult, json!({"passed": false}))
            .for_workflow(&WorkflowId::new("wf"), Some("corr-1"))
            .for_task(&TaskId::new("save"), TaskType::Action);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("crv_result"));
        assert_eq!(value["task_type"], json!("action"));
        assert_eq!(value["correlation_id"], json!("corr-1"));
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn test_metrics_record() {
        let mut metrics = Metrics::new();
        metrics.record(&TaskExecutionResult::succeeded(TaskId::new("a"), json!(1)).with_attempts(3));
        metrics.record(&TaskExecutionResult::skipped(
            TaskId::new("b"),
            ErrorKind::GuardRejected,
            "rejected",
        ));
        assert_eq!(metrics.tasks(), 2);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.tasks_skipped, 1);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.to_metrics(&WorkflowId::new("wf")).len(), 8);
    }

    #[test]
    fn test_span_finish() {
        let span = Span::start("run_1", None, "task:read").with_tag("task_id", "read").finish();
        assert!(span.end_time.is_some());
        assert!(span.duration.unwrap() >= 0.0);
    }
}
