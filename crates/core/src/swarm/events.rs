//! # Workflow Events
//!
//! Progress events published while a workflow runs, and the sinks that
//! deliver them. Publishing is fire-and-forget: a sink never reports
//! failure back, and a lost event never affects the workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::WorkflowConfig;
use crate::state::ProjectId;

/// Kind of workflow event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    /// A specialist call is about to start
    ProgressUpdate,
    /// Elicitor questions are ready
    QuestionsReady,
    /// spec.md is ready for approval
    SpecReady,
    /// Prompt package written
    PromptsGenerated,
    /// Workflow reached COMPLETED, carries usage totals
    WorkflowCompleted,
    /// A transition failed
    WorkflowFailed,
    /// User-requested refinement finished
    RefinementCompleted,
}

impl WorkflowEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProgressUpdate => "progress_update",
            Self::QuestionsReady => "questions_ready",
            Self::SpecReady => "spec_ready",
            Self::PromptsGenerated => "prompts_generated",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::RefinementCompleted => "refinement_completed",
        }
    }
}

impl fmt::Display for WorkflowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observable workflow milestone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventKind,
    /// Payload; always has a human-readable `message`
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(event_type: WorkflowEventKind, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn message(&self) -> &str {
        self.data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
    }
}

/// Room name for a project's events
pub fn project_topic(project_id: ProjectId) -> String {
    format!("project:{}", project_id)
}

/// Fire-and-forget event delivery
pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, event: &WorkflowEvent);
}

/// Writes events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, topic: &str, event: &WorkflowEvent) {
        tracing::info!(topic, event = %event.event_type, "{}", event.message());
    }
}

/// Forwards events into a bounded channel, dropping them when it is full or closed
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<(String, WorkflowEvent)>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<(String, WorkflowEvent)>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<(String, WorkflowEvent)>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    /// Channel sized by `event_buffer`
    pub fn from_config(config: &WorkflowConfig) -> (Self, mpsc::Receiver<(String, WorkflowEvent)>) {
        Self::channel(config.event_buffer)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, topic: &str, event: &WorkflowEvent) {
        if let Err(e) = self.tx.try_send((topic.to_string(), event.clone())) {
            tracing::warn!(topic, event = %event.event_type, "Dropped workflow event: {}", e);
        }
    }
}

/// Publishes to one fixed topic
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    topic: String,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
        }
    }

    /// Emitter for the `project:<id>` room
    pub fn for_project(sink: Arc<dyn EventSink>, project_id: ProjectId) -> Self {
        Self::new(sink, project_topic(project_id))
    }

    /// Emitter that only logs
    pub fn logging(topic: impl Into<String>) -> Self {
        Self::new(Arc::new(LogSink), topic)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn emit(&self, kind: WorkflowEventKind, data: Value) {
        self.sink.publish(&self.topic, &WorkflowEvent::new(kind, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_names() {
        let event = WorkflowEvent::new(
            WorkflowEventKind::QuestionsReady,
            json!({ "message": "Questions ready" }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "questions_ready");
        assert_eq!(event.message(), "Questions ready");
        assert_eq!(WorkflowEventKind::RefinementCompleted.to_string(), "refinement_completed");
    }

    #[test]
    fn test_project_topic() {
        assert_eq!(project_topic(42), "project:42");
    }

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel(8);
        let emitter = Emitter::for_project(Arc::new(sink), 3);

        emitter.emit(WorkflowEventKind::ProgressUpdate, json!({ "stage": "eliciting" }));
        emitter.emit(WorkflowEventKind::QuestionsReady, json!({ "questions": [] }));

        let (topic, first) = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(topic, "project:3");
        assert_eq!(first.event_type, WorkflowEventKind::ProgressUpdate);
        let (_, second) = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(second.event_type, WorkflowEventKind::QuestionsReady);
    }

    #[test]
    fn test_channel_sink_sized_from_config() {
        let config = WorkflowConfig {
            event_buffer: 2,
            ..WorkflowConfig::default()
        };
        let (sink, mut rx) = ChannelSink::from_config(&config);
        let event = WorkflowEvent::new(WorkflowEventKind::ProgressUpdate, json!({}));

        for _ in 0..3 {
            sink.publish("project:1", &event);
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_drops_when_full_or_closed() {
        let (sink, mut rx) = ChannelSink::channel(1);
        let event = WorkflowEvent::new(WorkflowEventKind::SpecReady, json!({}));

        sink.publish("project:1", &event);
        sink.publish("project:1", &event);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        drop(rx);
        sink.publish("project:1", &event);
    }
}
