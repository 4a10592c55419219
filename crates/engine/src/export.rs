//! Serializable copies of workflows, and importing them under fresh ids.
//!
//! Publishing and workflow duplication both go through here: the source is
//! exported, then imported into a new workflow. Every node gets a new id and
//! a new service descriptor, and branch keys embedded in settings (router
//! edge uids) are rewritten through [`NodeType::remap_ids`].

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodes::{DispatchResult, NodeType, NodeTypeRegistry, ServiceDescriptor};

use crate::models::{Node, NodeId, Workflow, WorkflowId, WorkflowState};
use crate::store::{GraphStore, NodeChanges};
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    pub id: NodeId,
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub parent_node_id: Option<NodeId>,
    #[serde(default)]
    pub previous_node_id: Option<NodeId>,
    #[serde(default)]
    pub previous_node_output: String,
    pub order: f64,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub sample_data: Option<DispatchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedWorkflow {
    pub name: String,
    pub state: WorkflowState,
    pub nodes: Vec<ExportedNode>,
}

/// Old -> new ids collected during an import.
#[derive(Debug, Clone, Default)]
pub struct IdMapping {
    pub nodes: HashMap<NodeId, NodeId>,
    /// Branch keys rewritten by node types.
    pub outputs: HashMap<String, String>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, id: NodeId) -> NodeId {
        self.nodes.get(&id).copied().unwrap_or(id)
    }
}

pub fn export_node(node: &Node) -> ExportedNode {
    ExportedNode {
        id: node.id,
        node_type: node.node_type.clone(),
        label: node.label.clone(),
        parent_node_id: node.parent_node_id,
        previous_node_id: node.previous_node_id,
        previous_node_output: node.previous_node_output.clone(),
        order: node.order,
        settings: node.service.settings.clone(),
        sample_data: node.service.sample_data.clone(),
    }
}

pub async fn export_workflow(
    store: &dyn GraphStore,
    workflow_id: WorkflowId,
) -> Result<ExportedWorkflow, EngineError> {
    let workflow = store.get_workflow(workflow_id).await?;
    let nodes = store.nodes_of(workflow_id).await?;
    Ok(ExportedWorkflow {
        name: workflow.name,
        state: workflow.state,
        nodes: nodes.iter().map(export_node).collect(),
    })
}

/// Insert copies of `exported` into `workflow_id` and return them.
///
/// Back-pointers and parents that point outside the exported set are kept
/// unchanged.
pub async fn import_nodes(
    store: &dyn GraphStore,
    registry: &NodeTypeRegistry,
    workflow_id: WorkflowId,
    exported: &[ExportedNode],
    mapping: &mut IdMapping,
) -> Result<Vec<Node>, EngineError> {
    // First pass: fresh ids, and let each type rewrite its embedded ids.
    let mut imported = Vec::with_capacity(exported.len());
    for source in exported {
        let node_type = registry
            .get(&source.node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(source.node_type.clone()))?;

        let mut service = ServiceDescriptor::new(source.settings.clone());
        service.sample_data = source.sample_data.clone();
        node_type.remap_ids(&mut service, &mut mapping.outputs);

        let id = Uuid::new_v4();
        mapping.nodes.insert(source.id, id);
        imported.push(Node {
            id,
            workflow_id,
            parent_node_id: source.parent_node_id,
            node_type: source.node_type.clone(),
            label: source.label.clone(),
            previous_node_id: source.previous_node_id,
            previous_node_output: source.previous_node_output.clone(),
            order: source.order,
            service,
            trashed: false,
            created_at: Utc::now(),
        });
    }

    // Second pass: every id is known now.
    for node in &mut imported {
        node.previous_node_id = node.previous_node_id.map(|id| mapping.node(id));
        node.parent_node_id = node.parent_node_id.map(|id| mapping.node(id));
        if let Some(output) = mapping.outputs.get(&node.previous_node_output) {
            node.previous_node_output = output.clone();
        }
    }

    let mut changes = NodeChanges::new();
    changes.upsert_all(imported.iter().cloned());
    store.apply(changes).await?;

    Ok(imported)
}

/// Store `workflow` and import `exported`'s nodes into it.
pub async fn import_workflow(
    store: &dyn GraphStore,
    registry: &NodeTypeRegistry,
    workflow: Workflow,
    exported: &ExportedWorkflow,
    mapping: &mut IdMapping,
) -> Result<(Workflow, Vec<Node>), EngineError> {
    store.insert_workflow(&workflow).await?;
    let nodes = import_nodes(store, registry, workflow.id, &exported.nodes, mapping).await?;
    Ok((workflow, nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{registry, Fixture};
    use crate::validate::validate_graph;
    use uuid::Uuid;

    #[tokio::test]
    async fn import_remaps_ids_and_router_branches() {
        let fx = Fixture::new().await;
        let router = fx.attach("router", fx.trigger.id, "").await;
        let branch = fx.mutator.registry().get("router").unwrap().output_keys(&router.service)[0].clone();
        let on_branch = fx.attach("http_request", router.id, &branch).await;

        let exported = export_workflow(fx.store.as_ref(), fx.workflow.id).await.unwrap();
        assert_eq!(exported.nodes.len(), 3);

        let target = Workflow::new(fx.workflow.automation_id, "Copy", 2);
        let mut mapping = IdMapping::new();
        let (copy, nodes) = import_workflow(fx.store.as_ref(), &registry(), target, &exported, &mut mapping)
            .await
            .unwrap();

        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.workflow_id == copy.id));

        let new_router = nodes.iter().find(|n| n.id == mapping.nodes[&router.id]).unwrap();
        let new_child = nodes.iter().find(|n| n.id == mapping.nodes[&on_branch.id]).unwrap();
        assert_ne!(new_router.service.id, router.service.id);
        assert_eq!(new_child.previous_node_id, Some(new_router.id));
        assert_ne!(new_child.previous_node_output, branch);
        assert_eq!(new_child.previous_node_output, mapping.outputs[&branch]);

        let stored = fx.store.nodes_of(copy.id).await.unwrap();
        validate_graph(&stored, &registry()).unwrap();
    }

    #[tokio::test]
    async fn unknown_type_aborts_import() {
        let fx = Fixture::new().await;
        let mut exported = export_workflow(fx.store.as_ref(), fx.workflow.id).await.unwrap();
        exported.nodes[0].node_type = "teleport".into();

        let err = import_nodes(fx.store.as_ref(), &registry(), Uuid::new_v4(), &exported.nodes, &mut IdMapping::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType(t) if t == "teleport"));
    }
}
