//! Per-node events for external observability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// One structured event emitted while a node runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub node: Node,
    pub message: String,
    pub level: EventLevel,
}

impl NodeEvent {
    pub fn new(run_id: Uuid, node: Node, level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            node,
            message: message.into(),
            level,
        }
    }
}

/// Destination for node events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &NodeEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &NodeEvent) {
        match event.level {
            EventLevel::Info => tracing::info!(
                run_id = %event.run_id,
                node = %event.node,
                "{}",
                event.message
            ),
            EventLevel::Warning => tracing::warn!(
                run_id = %event.run_id,
                node = %event.node,
                "{}",
                event.message
            ),
            EventLevel::Error => tracing::error!(
                run_id = %event.run_id,
                node = %event.node,
                "{}",
                event.message
            ),
        }
    }
}

/// Forwards events into an unbounded channel (backs the streaming endpoint).
///
/// A closed receiver is ignored; the run keeps going.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &NodeEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let run_id = Uuid::new_v4();
        sink.emit(&NodeEvent::new(
            run_id,
            Node::LoadInbox,
            EventLevel::Info,
            "Loading inbox emails",
        ));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.run_id, run_id);
        assert_eq!(event.node, Node::LoadInbox);
        assert_eq!(event.message, "Loading inbox emails");
    }

    #[test]
    fn channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(&NodeEvent::new(
            Uuid::new_v4(),
            Node::End,
            EventLevel::Info,
            "Workflow completed",
        ));
    }

    #[test]
    fn event_serializes_level_uppercase() {
        let event = NodeEvent::new(Uuid::new_v4(), Node::Escalate, EventLevel::Warning, "x");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "WARNING");
        assert_eq!(json["node"], "escalate");
        assert!(json["timestamp"].is_string());
    }
}
