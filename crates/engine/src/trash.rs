//! Soft delete and restore of nodes.
//!
//! Trashing only hides a node: its back-pointer is kept, and nodes that
//! followed it are not relinked. Restoring brings it back at the same
//! position.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::models::{Node, NodeId, WorkflowId};
use crate::store::{GraphStore, NodeChanges};
use crate::EngineError;

/// Why a node went to the trash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrashCategory {
    /// A user deleted the node.
    Delete,
    /// The node was swapped out by a replace. Restoring it is managed by
    /// the engine, and neither trashing nor restoring it is announced as a
    /// plain delete or create.
    Replace,
}

impl TrashCategory {
    pub fn announces_delete_and_create(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrashEntry {
    pub node_id: NodeId,
    pub workflow_id: WorkflowId,
    pub category: TrashCategory,
    pub trashed_at: DateTime<Utc>,
}

#[async_trait]
pub trait TrashBin: Send + Sync {
    async fn trash(&self, node: &Node, category: TrashCategory) -> Result<TrashEntry, EngineError>;

    /// Bring back a node trashed under `category`.
    async fn restore(&self, category: TrashCategory, node_id: NodeId) -> Result<Node, EngineError>;

    fn entry(&self, node_id: NodeId) -> Option<TrashEntry>;
}

/// Trash bin that flips the store's `trashed` flag and remembers entries in
/// memory.
pub struct StoreTrashBin {
    store: Arc<dyn GraphStore>,
    entries: DashMap<NodeId, TrashEntry>,
}

impl StoreTrashBin {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl TrashBin for StoreTrashBin {
    async fn trash(&self, node: &Node, category: TrashCategory) -> Result<TrashEntry, EngineError> {
        // Re-read so relinks applied just before trashing are kept.
        let mut trashed = self.store.get_node(node.id).await?;
        trashed.trashed = true;
        let mut changes = NodeChanges::new();
        changes.upsert(trashed);
        self.store.apply(changes).await?;

        let entry = TrashEntry {
            node_id: node.id,
            workflow_id: node.workflow_id,
            category,
            trashed_at: Utc::now(),
        };
        self.entries.insert(node.id, entry.clone());
        debug!(node_id = %node.id, ?category, "node trashed");
        Ok(entry)
    }

    async fn restore(&self, category: TrashCategory, node_id: NodeId) -> Result<Node, EngineError> {
        let matches = self
            .entries
            .get(&node_id)
            .is_some_and(|entry| entry.category == category);
        if !matches {
            return Err(EngineError::RestoreDisallowed(
                node_id,
                format!("no {category:?} trash entry"),
            ));
        }

        let mut node = self.store.get_node(node_id).await?;
        node.trashed = false;
        let mut changes = NodeChanges::new();
        changes.upsert(node.clone());
        self.store.apply(changes).await?;

        self.entries.remove(&node_id);
        debug!(node_id = %node_id, ?category, "node restored");
        Ok(node)
    }

    fn entry(&self, node_id: NodeId) -> Option<TrashEntry> {
        self.entries.get(&node_id).map(|e| e.value().clone())
    }
}
