//! Graph Store: persistence seam for nodes, workflows and run history.
//!
//! Reads go straight through the store. Node writes are grouped into a
//! [`NodeChanges`] set and applied atomically, so a multi-step relink is
//! never half visible.

pub mod memory;
pub mod sql;

use async_trait::async_trait;

use crate::models::{AutomationId, Node, NodeId, RunHistoryEntry, Workflow, WorkflowId};
use crate::EngineError;

pub use memory::MemoryGraphStore;
pub use sql::SqlGraphStore;

/// Node writes applied as one unit.
#[derive(Debug, Clone, Default)]
pub struct NodeChanges {
    pub upserts: Vec<Node>,
    /// Hard deletes. Soft deletes are upserts with `trashed` set.
    pub deletes: Vec<NodeId>,
}

impl NodeChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `node` for writing, replacing an earlier queued copy.
    pub fn upsert(&mut self, node: Node) -> &mut Self {
        match self.upserts.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.upserts.push(node),
        }
        self
    }

    pub fn upsert_all(&mut self, nodes: impl IntoIterator<Item = Node>) -> &mut Self {
        for node in nodes {
            self.upsert(node);
        }
        self
    }

    pub fn delete(&mut self, id: NodeId) -> &mut Self {
        self.deletes.push(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    // ------ nodes ------

    /// A node by id, trashed or not.
    async fn get_node(&self, id: NodeId) -> Result<Node, EngineError>;

    /// Live nodes of a workflow with their service descriptors attached,
    /// by display order. Callers that need execution order walk
    /// [`GraphStore::successors_of`] instead.
    async fn nodes_of(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, EngineError>;

    /// Live nodes whose back-pointer is `previous` (`None` asks for the
    /// workflow's first nodes), restricted to branch `output` when given.
    async fn successors_of(
        &self,
        workflow_id: WorkflowId,
        previous: Option<NodeId>,
        output: Option<&str>,
    ) -> Result<Vec<Node>, EngineError>;

    async fn apply(&self, changes: NodeChanges) -> Result<(), EngineError>;

    /// Live triggers of `node_type` in every workflow.
    async fn triggers_of_type(&self, node_type: &str) -> Result<Vec<Node>, EngineError>;

    // ------ workflows ------

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), EngineError>;

    /// A workflow by id, trashed or not.
    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, EngineError>;

    /// Workflows of an automation in display order. Published copies are
    /// never included.
    async fn workflows_of(
        &self,
        automation_id: AutomationId,
        include_trashed: bool,
    ) -> Result<Vec<Workflow>, EngineError>;

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError>;

    /// Published copies of `source`, oldest first.
    async fn published_copies_of(&self, source: WorkflowId) -> Result<Vec<Workflow>, EngineError>;

    /// Hard delete; nodes and history go with it.
    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), EngineError>;

    // ------ history ------

    async fn insert_history(&self, entry: &RunHistoryEntry) -> Result<(), EngineError>;

    async fn save_history(&self, entry: &RunHistoryEntry) -> Result<(), EngineError>;

    /// The `limit` most recent entries of a workflow, newest first.
    async fn recent_history(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunHistoryEntry>, EngineError>;

    // ------ derived reads ------

    /// Node ids of a workflow, ascending by `order`.
    async fn display_order_of(&self, workflow_id: WorkflowId) -> Result<Vec<NodeId>, EngineError> {
        Ok(self.nodes_of(workflow_id).await?.into_iter().map(|n| n.id).collect())
    }

    /// The workflow's entry point: its top-level node without predecessor.
    async fn trigger_of(&self, workflow_id: WorkflowId) -> Result<Option<Node>, EngineError> {
        Ok(self
            .successors_of(workflow_id, None, None)
            .await?
            .into_iter()
            .find(|n| n.parent_node_id.is_none()))
    }

    /// The draft a published copy came from, or the workflow itself.
    async fn original_of(&self, workflow: &Workflow) -> Result<Workflow, EngineError> {
        match workflow.published_from {
            Some(source) => self.get_workflow(source).await,
            None => Ok(workflow.clone()),
        }
    }

    /// The newest published copy of `source`.
    async fn published_of(&self, source: WorkflowId) -> Result<Option<Workflow>, EngineError> {
        Ok(self.published_copies_of(source).await?.pop())
    }

    /// A live node that must belong to `workflow_id`.
    async fn node_in(&self, workflow_id: WorkflowId, id: NodeId) -> Result<Node, EngineError> {
        let node = self.get_node(id).await?;
        if node.trashed {
            return Err(EngineError::NodeNotFound(id));
        }
        if node.workflow_id != workflow_id {
            return Err(EngineError::NodeNotInWorkflow { node_id: id, workflow_id });
        }
        Ok(node)
    }
}

/// Sort nodes the way every store returns them.
pub(crate) fn sort_by_display_order(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| a.order.total_cmp(&b.order).then(a.id.cmp(&b.id)));
}
