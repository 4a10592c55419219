//! In-process [`GraphStore`] used by tests and one-shot CLI runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_by_display_order, GraphStore, NodeChanges};
use crate::models::{AutomationId, Node, NodeId, RunHistoryEntry, Workflow, WorkflowId};
use crate::EngineError;

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<NodeId, Node>,
    /// Insertion order doubles as creation order for published copies.
    workflows: Vec<Workflow>,
    history: Vec<RunHistoryEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<State>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn get_node(&self, id: NodeId) -> Result<Node, EngineError> {
        let state = self.state.read().await;
        state.nodes.get(&id).cloned().ok_or(EngineError::NodeNotFound(id))
    }

    async fn nodes_of(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, EngineError> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.workflow_id == workflow_id && !n.trashed)
            .cloned()
            .collect();
        sort_by_display_order(&mut nodes);
        Ok(nodes)
    }

    async fn successors_of(
        &self,
        workflow_id: WorkflowId,
        previous: Option<NodeId>,
        output: Option<&str>,
    ) -> Result<Vec<Node>, EngineError> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| {
                n.workflow_id == workflow_id
                    && !n.trashed
                    && n.previous_node_id == previous
                    && output.map_or(true, |o| n.previous_node_output == o)
            })
            .cloned()
            .collect();
        sort_by_display_order(&mut nodes);
        Ok(nodes)
    }

    async fn triggers_of_type(&self, node_type: &str) -> Result<Vec<Node>, EngineError> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| {
                n.node_type == node_type
                    && !n.trashed
                    && n.previous_node_id.is_none()
                    && n.parent_node_id.is_none()
            })
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn apply(&self, changes: NodeChanges) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        for node in changes.upserts {
            state.nodes.insert(node.id, node);
        }
        for id in changes.deletes {
            state.nodes.remove(&id);
        }
        Ok(())
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.state.write().await.workflows.push(workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, EngineError> {
        let state = self.state.read().await;
        state
            .workflows
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    async fn workflows_of(
        &self,
        automation_id: AutomationId,
        include_trashed: bool,
    ) -> Result<Vec<Workflow>, EngineError> {
        let state = self.state.read().await;
        let mut workflows: Vec<Workflow> = state
            .workflows
            .iter()
            .filter(|w| {
                w.automation_id == automation_id
                    && !w.is_published_copy()
                    && (include_trashed || !w.trashed)
            })
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.order.cmp(&b.order).then(a.id.cmp(&b.id)));
        Ok(workflows)
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let slot = state
            .workflows
            .iter_mut()
            .find(|w| w.id == workflow.id)
            .ok_or(EngineError::WorkflowNotFound(workflow.id))?;
        *slot = workflow.clone();
        Ok(())
    }

    async fn published_copies_of(&self, source: WorkflowId) -> Result<Vec<Workflow>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .iter()
            .filter(|w| w.published_from == Some(source))
            .cloned()
            .collect())
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let before = state.workflows.len();
        state.workflows.retain(|w| w.id != id);
        if state.workflows.len() == before {
            return Err(EngineError::WorkflowNotFound(id));
        }
        state.nodes.retain(|_, n| n.workflow_id != id);
        state.history.retain(|h| h.workflow_id != id);
        Ok(())
    }

    async fn insert_history(&self, entry: &RunHistoryEntry) -> Result<(), EngineError> {
        self.state.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn save_history(&self, entry: &RunHistoryEntry) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        match state.history.iter_mut().find(|h| h.id == entry.id) {
            Some(slot) => {
                *slot = entry.clone();
                Ok(())
            }
            None => Err(EngineError::Database(db::DbError::not_found(
                "workflow_history",
                entry.id.to_string(),
            ))),
        }
    }

    async fn recent_history(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunHistoryEntry>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|h| h.workflow_id == workflow_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
