//! Structural-change notifications for real-time observers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Node, NodeId, Workflow, WorkflowId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    NodeCreated { node: Node },
    NodeUpdated { node: Node },
    /// Several nodes relinked by one operation.
    NodesUpdated { workflow_id: WorkflowId, nodes: Vec<Node> },
    NodeDeleted { workflow_id: WorkflowId, node_id: NodeId },
    NodesReordered { workflow_id: WorkflowId, order: Vec<NodeId> },
    /// One node swapped for another; observers replace `deleted` with
    /// `restored` in place.
    NodeReplaced { workflow_id: WorkflowId, deleted: Node, restored: Node },
    WorkflowCreated { workflow: Workflow },
    WorkflowUpdated { workflow: Workflow },
    WorkflowDeleted { workflow_id: WorkflowId },
    WorkflowsReordered { order: Vec<WorkflowId> },
    WorkflowPublished { source: WorkflowId, published: Workflow },
}

/// Receives [`GraphEvent`]s. Emitting never fails and never blocks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GraphEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: GraphEvent) {}
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<GraphEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: GraphEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }
}
