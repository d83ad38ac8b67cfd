//! Wake-up signals and the queue that carries them.
//!
//! A wake-up asks the driver to make one step of progress on a workflow.
//! Delivery is at-least-once and unordered, so a signal carries nothing but
//! the workflow ID; everything else is read from the document.

use async_trait::async_trait;
use blockflow_core::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A request to make progress on one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeupSignal {
    /// The workflow to advance.
    pub workflow_id: WorkflowId,
    /// When the signal was emitted, for latency logging only.
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl WakeupSignal {
    /// Creates a signal stamped with the current time.
    #[must_use]
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            emitted_at: Utc::now(),
        }
    }
}

/// Errors from the wake-up queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Could not connect to or set up the queue.
    ConnectionFailed { message: String },
    /// The signal was not accepted.
    PublishFailed { message: String },
    /// The queue has shut down.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "queue connection failed: {message}"),
            Self::PublishFailed { message } => write!(f, "failed to publish wake-up: {message}"),
            Self::Closed => write!(f, "wake-up queue closed"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Emits wake-up signals.
#[async_trait]
pub trait WakeupQueue: Send + Sync {
    /// Enqueues one signal.
    async fn emit(&self, signal: WakeupSignal) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q: WakeupQueue + ?Sized> WakeupQueue for Arc<Q> {
    async fn emit(&self, signal: WakeupSignal) -> Result<(), QueueError> {
        (**self).emit(signal).await
    }
}

/// In-process wake-up queue over an unbounded channel.
///
/// Used when running without NATS and in tests, where the receiver doubles
/// as a record of emitted signals.
#[derive(Debug, Clone)]
pub struct ChannelWakeupQueue {
    sender: mpsc::UnboundedSender<WakeupSignal>,
}

impl ChannelWakeupQueue {
    /// Creates a queue and the receiver draining it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WakeupSignal>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl WakeupQueue for ChannelWakeupQueue {
    async fn emit(&self, signal: WakeupSignal) -> Result<(), QueueError> {
        self.sender.send(signal).map_err(|_| QueueError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn signal_wire_shape() {
        let id = WorkflowId::new();
        let json = serde_json::to_value(WakeupSignal::new(id.clone())).expect("to_value");
        assert_eq!(json["workflowId"], id.as_str());
        assert!(json.get("emittedAt").is_some());
    }

    #[test]
    fn bare_workflow_id_message_is_accepted() {
        let id = WorkflowId::new();
        let body = format!(r#"{{"version": 1, "payload": {{"workflowId": "{id}"}}}}"#);
        let envelope: Envelope<WakeupSignal> = Envelope::decode(body.as_bytes()).expect("decode");
        assert_eq!(envelope.into_payload().workflow_id, id);
    }

    #[test]
    fn invalid_workflow_id_is_rejected() {
        let body = r#"{"version": 1, "payload": {"workflowId": "../../etc"}}"#;
        assert!(Envelope::<WakeupSignal>::decode(body.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn channel_queue_delivers_in_order() {
        let (queue, mut receiver) = ChannelWakeupQueue::channel();
        let a = WorkflowId::new();
        let b = WorkflowId::new();
        queue.emit(WakeupSignal::new(a.clone())).await.expect("a");
        queue.emit(WakeupSignal::new(b.clone())).await.expect("b");
        assert_eq!(receiver.recv().await.map(|s| s.workflow_id), Some(a));
        assert_eq!(receiver.recv().await.map(|s| s.workflow_id), Some(b));
    }

    #[tokio::test]
    async fn closed_channel_reports_closed() {
        let (queue, receiver) = ChannelWakeupQueue::channel();
        drop(receiver);
        let err = queue
            .emit(WakeupSignal::new(WorkflowId::new()))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::Closed);
    }
}
