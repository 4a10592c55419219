//! Graph Mutation Engine.
//!
//! `GraphMutator` is the only write path for nodes. Every operation:
//! 1. Checks permissions before touching anything.
//! 2. Takes the workflow lock, so multi-step relinks never interleave.
//! 3. Computes the new back-pointers on working copies.
//! 4. Writes them through the store as one [`NodeChanges`] set.
//! 5. Emits notifications.
//!
//! Successor lists are always derived from back-pointers; the relinking
//! below only ever rewrites `(previous_node_id, previous_node_output)`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use nodes::{NodeType, NodeTypeRegistry, ServiceDescriptor};

use crate::events::{EventSink, GraphEvent, NullSink};
use crate::locks::WorkflowLocks;
use crate::models::{
    NewNode, NextNodeValues, Node, NodeDuplication, NodeId, NodeMove, NodeScope, NodeSwap,
    NodeUpdate, ReplacedNode, WorkflowId,
};
use crate::order::{dense_orders, last_order, order_before};
use crate::permissions::{Actor, AllowAll, Operation, PermissionChecker, Scope};
use crate::store::{GraphStore, NodeChanges};
use crate::trash::{StoreTrashBin, TrashBin, TrashCategory};
use crate::EngineError;

pub struct GraphMutator {
    store: Arc<dyn GraphStore>,
    registry: Arc<NodeTypeRegistry>,
    trash: Arc<dyn TrashBin>,
    events: Arc<dyn EventSink>,
    permissions: Arc<dyn PermissionChecker>,
    locks: WorkflowLocks,
}

impl GraphMutator {
    /// A mutator that allows everything, trashes through the store and
    /// drops notifications.
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<NodeTypeRegistry>) -> Self {
        Self {
            trash: Arc::new(StoreTrashBin::new(store.clone())),
            store,
            registry,
            events: Arc::new(NullSink),
            permissions: Arc::new(AllowAll),
            locks: WorkflowLocks::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_trash(mut self, trash: Arc<dyn TrashBin>) -> Self {
        self.trash = trash;
        self
    }

    pub fn with_locks(mut self, locks: WorkflowLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &WorkflowLocks {
        &self.locks
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub(crate) fn permissions(&self) -> &Arc<dyn PermissionChecker> {
        &self.permissions
    }

    pub fn node_type(&self, type_name: &str) -> Result<Arc<dyn NodeType>, EngineError> {
        self.registry
            .get(type_name)
            .ok_or_else(|| EngineError::UnknownNodeType(type_name.to_owned()))
    }

    /// A live node, and the workflow lock it lives under.
    async fn locked_node(
        &self,
        node_id: NodeId,
    ) -> Result<(Node, tokio::sync::OwnedMutexGuard<()>), EngineError> {
        let workflow_id = self.store.get_node(node_id).await?.workflow_id;
        let guard = self.locks.lock(workflow_id).await;
        let node = self.store.node_in(workflow_id, node_id).await?;
        Ok((node, guard))
    }

    /// Whether nodes hang from outputs that `node`'s type protects.
    async fn has_guarded_successors(
        &self,
        node: &Node,
        node_type: &dyn NodeType,
    ) -> Result<bool, EngineError> {
        let Some(outputs) = node_type.guarded_outputs(&node.service) else {
            return Ok(false);
        };
        let successors = self.store.successors_of(node.workflow_id, Some(node.id), None).await?;
        Ok(successors
            .iter()
            .any(|s| outputs.contains(&s.previous_node_output)))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn nodes_of(&self, actor: &Actor, workflow_id: WorkflowId) -> Result<Vec<Node>, EngineError> {
        self.permissions
            .ensure(actor, Operation::ReadNodes, Scope::Workflow(workflow_id))?;
        self.store.nodes_of(workflow_id).await
    }

    pub async fn display_order_of(&self, workflow_id: WorkflowId) -> Result<Vec<NodeId>, EngineError> {
        self.store.display_order_of(workflow_id).await
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create an action node. With `before`, the node is spliced in front of
    /// it: it takes over `before`'s predecessor slot (branch key included)
    /// and the nodes in that slot, `before` among them, now follow it.
    #[instrument(skip(self, actor, new), fields(workflow_id = %workflow_id))]
    pub async fn create_node(
        &self,
        actor: &Actor,
        type_name: &str,
        workflow_id: WorkflowId,
        before: Option<NodeId>,
        new: NewNode,
    ) -> Result<Node, EngineError> {
        self.permissions
            .ensure(actor, Operation::CreateNode, Scope::Workflow(workflow_id))?;

        let node_type = self.node_type(type_name)?;
        // Triggers come with the workflow and are only ever replaced.
        if node_type.is_trigger() {
            return Err(EngineError::TriggerCreationDisallowed);
        }
        self.store.get_workflow(workflow_id).await?;

        let _guard = self.locks.lock(workflow_id).await;

        let before = match before {
            Some(id) => {
                let before = self.store.get_node(id).await?;
                if before.trashed {
                    return Err(EngineError::NodeNotFound(id));
                }
                if before.workflow_id != workflow_id {
                    return Err(EngineError::BeforeInvalid(
                        "the `before` node must belong to the same workflow".into(),
                    ));
                }
                if before.previous_node_id.is_none() {
                    return Err(EngineError::BeforeInvalid(
                        "a node cannot be created before a trigger".into(),
                    ));
                }
                Some(before)
            }
            None => None,
        };

        let (node, relinked) = self
            .insert_node(workflow_id, node_type.as_ref(), before.as_ref(), new, None)
            .await?;

        info!(node_id = %node.id, node_type = %node.node_type, "node created");
        self.events.emit(GraphEvent::NodeCreated { node: node.clone() });
        if !relinked.is_empty() {
            self.events.emit(GraphEvent::NodesUpdated { workflow_id, nodes: relinked });
        }
        Ok(node)
    }

    /// Build and store a node; returns it with the nodes relinked to follow
    /// it. The caller holds the workflow lock and has validated `before`.
    pub(crate) async fn insert_node(
        &self,
        workflow_id: WorkflowId,
        node_type: &dyn NodeType,
        before: Option<&Node>,
        new: NewNode,
        order: Option<f64>,
    ) -> Result<(Node, Vec<Node>), EngineError> {
        let nodes = self.store.nodes_of(workflow_id).await?;

        let previous_node_id = match (new.previous_node_id, before) {
            (Some(id), _) => {
                if !nodes.iter().any(|n| n.id == id) {
                    return Err(EngineError::NodeNotInWorkflow { node_id: id, workflow_id });
                }
                Some(id)
            }
            (None, Some(before)) => before.previous_node_id,
            (None, None) => nodes
                .iter()
                .filter(|n| n.parent_node_id == new.parent_node_id)
                .max_by(|a, b| a.order.total_cmp(&b.order))
                .map(|n| n.id),
        };

        // The new node claims `before`'s branch key.
        let previous_node_output = match before {
            Some(before) if !before.previous_node_output.is_empty() => {
                before.previous_node_output.clone()
            }
            _ => new.previous_node_output.unwrap_or_default(),
        };

        let order = order.unwrap_or_else(|| match before {
            Some(before) => order_before(&nodes, before),
            None => last_order(&nodes),
        });

        let mut service = ServiceDescriptor::new(node_type.prepare_settings(new.settings.as_ref()));
        node_type.after_create(&mut service);

        let node = Node {
            id: Uuid::new_v4(),
            workflow_id,
            parent_node_id: new.parent_node_id,
            node_type: node_type.type_name().to_owned(),
            label: new.label,
            previous_node_id,
            previous_node_output,
            order,
            service,
            trashed: false,
            created_at: Utc::now(),
        };

        let mut relinked = Vec::new();
        if let Some(before) = before {
            let peers = self
                .store
                .successors_of(
                    workflow_id,
                    before.previous_node_id,
                    Some(&before.previous_node_output),
                )
                .await?;
            for mut peer in peers {
                peer.relink(Some(node.id), "");
                relinked.push(peer);
            }
        }

        let mut changes = NodeChanges::new();
        changes.upsert(node.clone()).upsert_all(relinked.iter().cloned());
        self.store.apply(changes).await?;

        Ok((node, relinked))
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    #[instrument(skip(self, actor, update))]
    pub async fn update_node(
        &self,
        actor: &Actor,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> Result<Node, EngineError> {
        self.permissions
            .ensure(actor, Operation::UpdateNode, Scope::Node(node_id))?;

        let (mut node, _guard) = self.locked_node(node_id).await?;
        let node_type = self.node_type(&node.node_type)?;

        if let Some(label) = update.label {
            node.label = label;
        }
        if let Some(settings) = update.settings {
            let previous = node.service.clone();
            merge_settings(node_type.as_ref(), &mut node.service, &settings);
            // Dropping an output would strand the nodes hanging from it.
            for output in node_type.removed_outputs(&previous, &node.service) {
                let attached = self
                    .store
                    .successors_of(node.workflow_id, Some(node.id), Some(output.as_str()))
                    .await?;
                if !attached.is_empty() {
                    return Err(EngineError::NodeOutputInUse { node_id: node.id, output });
                }
            }
        }

        let mut changes = NodeChanges::new();
        changes.upsert(node.clone());
        self.store.apply(changes).await?;

        self.events.emit(GraphEvent::NodeUpdated { node: node.clone() });
        Ok(node)
    }

    /// Rewrite the back-pointers of several nodes at once. Undo and redo of
    /// moves and duplications are expressed with this.
    #[instrument(skip(self, actor, values), fields(workflow_id = %workflow_id, count = values.len()))]
    pub async fn update_next_nodes_values(
        &self,
        actor: &Actor,
        workflow_id: WorkflowId,
        values: &[NextNodeValues],
    ) -> Result<Vec<Node>, EngineError> {
        self.permissions
            .ensure(actor, Operation::UpdateNode, Scope::Workflow(workflow_id))?;

        let _guard = self.locks.lock(workflow_id).await;

        let mut updated = Vec::with_capacity(values.len());
        for value in values {
            let mut node = self.store.node_in(workflow_id, value.id).await?;
            node.relink(value.previous_node_id, &value.previous_node_output);
            updated.push(node);
        }

        let mut changes = NodeChanges::new();
        changes.upsert_all(updated.iter().cloned());
        self.store.apply(changes).await?;

        if !updated.is_empty() {
            self.events.emit(GraphEvent::NodesUpdated {
                workflow_id,
                nodes: updated.clone(),
            });
        }
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Move
    // -----------------------------------------------------------------------

    /// Move `node_id` to follow `after_node_id` on branch `output`.
    ///
    /// The gap at the origin is closed first (its successors follow its old
    /// predecessor), then the nodes already following `after_node_id` on
    /// that branch are pushed behind the moved node.
    #[instrument(skip(self, actor))]
    pub async fn move_node(
        &self,
        actor: &Actor,
        node_id: NodeId,
        after_node_id: NodeId,
        output: Option<String>,
        order: Option<f64>,
    ) -> Result<NodeMove, EngineError> {
        self.permissions
            .ensure(actor, Operation::UpdateNode, Scope::Node(node_id))?;

        let (node, _guard) = self.locked_node(node_id).await?;
        let node_type = self.node_type(&node.node_type)?;
        if node_type.is_fixed() || after_node_id == node_id {
            return Err(EngineError::NodeNotMovable(node_id));
        }
        let workflow_id = node.workflow_id;
        let after = self.store.node_in(workflow_id, after_node_id).await?;
        let output = output.unwrap_or_default();

        let mut nodes = self.store.nodes_of(workflow_id).await?;
        let at = index_of(&nodes, node.id)?;
        let mut touched = HashSet::new();

        // Step 1: close the gap at the origin.
        let origin: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].previous_node_id == Some(node.id))
            .collect();
        let origin_old_next_nodes_values: Vec<_> =
            origin.iter().map(|&i| nodes[i].next_values()).collect();
        for &i in &origin {
            nodes[i].relink(node.previous_node_id, &node.previous_node_output);
            touched.insert(i);
        }
        let origin_new_next_nodes_values: Vec<_> =
            origin.iter().map(|&i| nodes[i].next_values()).collect();

        // Step 2: place the node.
        let destination: Vec<usize> = (0..nodes.len())
            .filter(|&i| i != at && nodes[i].follows(Some(after.id), &output))
            .collect();
        let destination_old_next_nodes_values: Vec<_> =
            destination.iter().map(|&i| nodes[i].next_values()).collect();

        let order = order.unwrap_or_else(|| {
            destination
                .iter()
                .map(|&i| nodes[i].order)
                .fold(after.order, f64::max)
                + 1.0
        });
        nodes[at].relink(Some(after.id), &output);
        nodes[at].order = order;

        // Step 3: open the gap at the destination.
        for &i in &destination {
            nodes[i].relink(Some(node.id), "");
            touched.insert(i);
        }
        let destination_new_next_nodes_values: Vec<_> =
            destination.iter().map(|&i| nodes[i].next_values()).collect();

        let mut touched: Vec<usize> = touched.into_iter().collect();
        touched.sort_unstable();
        let next_node_updates: Vec<Node> = touched.iter().map(|&i| nodes[i].clone()).collect();
        let moved = nodes[at].clone();

        let mut changes = NodeChanges::new();
        changes
            .upsert(moved.clone())
            .upsert_all(next_node_updates.iter().cloned());
        self.store.apply(changes).await?;

        info!(node_id = %node_id, after = %after_node_id, "node moved");
        let mut updated = vec![moved.clone()];
        updated.extend(next_node_updates.iter().cloned());
        self.events.emit(GraphEvent::NodesUpdated { workflow_id, nodes: updated });

        Ok(NodeMove {
            destination_previous_node_id: moved.previous_node_id,
            destination_previous_node_output: moved.previous_node_output.clone(),
            node: moved,
            next_node_updates,
            origin_previous_node_id: node.previous_node_id,
            origin_previous_node_output: node.previous_node_output,
            origin_old_next_nodes_values,
            origin_new_next_nodes_values,
            destination_old_next_nodes_values,
            destination_new_next_nodes_values,
        })
    }

    // -----------------------------------------------------------------------
    // Duplicate
    // -----------------------------------------------------------------------

    /// Copy a node right behind its source on the default branch. Only the
    /// source's default-branch successors move behind the copy.
    #[instrument(skip(self, actor))]
    pub async fn duplicate_node(
        &self,
        actor: &Actor,
        node_id: NodeId,
    ) -> Result<NodeDuplication, EngineError> {
        self.permissions
            .ensure(actor, Operation::DuplicateNode, Scope::Node(node_id))?;

        let (source, _guard) = self.locked_node(node_id).await?;
        if self.node_type(&source.node_type)?.is_trigger() {
            return Err(EngineError::TriggerCreationDisallowed);
        }
        let workflow_id = source.workflow_id;

        let nodes = self.store.nodes_of(workflow_id).await?;
        let followers = self
            .store
            .successors_of(workflow_id, Some(source.id), Some(""))
            .await?;
        let source_next_nodes_values: Vec<_> = followers.iter().map(Node::next_values).collect();

        let duplicate = Node {
            id: Uuid::new_v4(),
            previous_node_id: Some(source.id),
            previous_node_output: String::new(),
            order: last_order(&nodes),
            service: source.service.duplicate(),
            trashed: false,
            created_at: Utc::now(),
            ..source.clone()
        };

        let relinked: Vec<Node> = followers
            .into_iter()
            .map(|mut n| {
                n.relink(Some(duplicate.id), "");
                n
            })
            .collect();
        let duplicate_next_nodes_values: Vec<_> = relinked.iter().map(Node::next_values).collect();

        let mut changes = NodeChanges::new();
        changes
            .upsert(duplicate.clone())
            .upsert_all(relinked.iter().cloned());
        self.store.apply(changes).await?;

        info!(node_id = %node_id, duplicate_id = %duplicate.id, "node duplicated");
        self.events.emit(GraphEvent::NodeCreated { node: duplicate.clone() });
        if !relinked.is_empty() {
            self.events.emit(GraphEvent::NodesUpdated { workflow_id, nodes: relinked });
        }

        Ok(NodeDuplication {
            source,
            source_next_nodes_values,
            duplicate,
            duplicate_next_nodes_values,
        })
    }

    // -----------------------------------------------------------------------
    // Replace
    // -----------------------------------------------------------------------

    /// Swap a node for a fresh one of `type_name` at the same position. The
    /// old node is trashed under [`TrashCategory::Replace`].
    #[instrument(skip(self, actor))]
    pub async fn replace_node(
        &self,
        actor: &Actor,
        node_id: NodeId,
        type_name: &str,
    ) -> Result<ReplacedNode, EngineError> {
        self.permissions
            .ensure(actor, Operation::CreateNode, Scope::Node(node_id))?;

        let (node, _guard) = self.locked_node(node_id).await?;
        let old_type = self.node_type(&node.node_type)?;
        let new_type = self.node_type(type_name)?;

        if !old_type.is_replaceable_with(new_type.as_ref()) {
            return Err(EngineError::NodeNotReplaceable(
                node_id,
                format!("'{}' and '{}' are in different categories", node.node_type, type_name),
            ));
        }
        if self.has_guarded_successors(&node, old_type.as_ref()).await? {
            return Err(EngineError::NodeNotReplaceable(
                node_id,
                "output nodes are attached to it".into(),
            ));
        }

        let workflow_id = node.workflow_id;
        let new = NewNode {
            parent_node_id: node.parent_node_id,
            ..NewNode::default()
        };
        let (replacement, _) = self
            .insert_node(workflow_id, new_type.as_ref(), Some(&node), new, Some(node.order))
            .await?;

        // The old node now follows its replacement; what followed the old
        // node follows the replacement too.
        let successors = self
            .store
            .successors_of(workflow_id, Some(node.id), None)
            .await?;
        let relinked: Vec<Node> = successors
            .into_iter()
            .map(|mut n| {
                n.relink(Some(replacement.id), "");
                n
            })
            .collect();
        if !relinked.is_empty() {
            let mut changes = NodeChanges::new();
            changes.upsert_all(relinked.iter().cloned());
            self.store.apply(changes).await?;
        }

        self.trash.trash(&node, TrashCategory::Replace).await?;
        let deleted = self.store.get_node(node_id).await?;

        info!(node_id = %node_id, replacement_id = %replacement.id, "node replaced");
        if !relinked.is_empty() {
            self.events.emit(GraphEvent::NodesUpdated { workflow_id, nodes: relinked });
        }
        self.events.emit(GraphEvent::NodeReplaced {
            workflow_id,
            deleted,
            restored: replacement.clone(),
        });

        Ok(ReplacedNode {
            node: replacement,
            original_node_id: node_id,
            original_node_type: node.node_type,
        })
    }

    /// Bring the original node of a replace back and trash its replacement.
    pub async fn undo_replace(
        &self,
        actor: &Actor,
        replaced: &ReplacedNode,
    ) -> Result<NodeSwap, EngineError> {
        self.swap(actor, replaced.node.id, replaced.original_node_id).await
    }

    /// Re-apply a replace that was undone.
    pub async fn redo_replace(
        &self,
        actor: &Actor,
        replaced: &ReplacedNode,
    ) -> Result<NodeSwap, EngineError> {
        self.swap(actor, replaced.original_node_id, replaced.node.id).await
    }

    /// Put the dormant node (trashed by a replace) where the active one is,
    /// then trash the active one the same way.
    #[instrument(skip(self, actor))]
    async fn swap(
        &self,
        actor: &Actor,
        active_id: NodeId,
        dormant_id: NodeId,
    ) -> Result<NodeSwap, EngineError> {
        self.permissions
            .ensure(actor, Operation::CreateNode, Scope::Node(active_id))?;

        let (active, _guard) = self.locked_node(active_id).await?;
        let workflow_id = active.workflow_id;
        let dormant = self.store.get_node(dormant_id).await?;
        if dormant.workflow_id != workflow_id {
            return Err(EngineError::NodeNotInWorkflow {
                node_id: dormant_id,
                workflow_id,
            });
        }

        let mut restored = self.trash.restore(TrashCategory::Replace, dormant_id).await?;
        restored.relink(active.previous_node_id, &active.previous_node_output);
        restored.order = active.order;

        // The restored node may still point at `active`; it is not a successor.
        let successors = self
            .store
            .successors_of(workflow_id, Some(active.id), None)
            .await?;
        let relinked: Vec<Node> = successors
            .into_iter()
            .filter(|n| n.id != restored.id)
            .map(|mut n| {
                let output = n.previous_node_output.clone();
                n.relink(Some(restored.id), &output);
                n
            })
            .collect();

        let mut demoted = active.clone();
        demoted.relink(Some(restored.id), "");

        let mut changes = NodeChanges::new();
        changes
            .upsert(restored.clone())
            .upsert(demoted)
            .upsert_all(relinked.iter().cloned());
        self.store.apply(changes).await?;

        self.trash.trash(&active, TrashCategory::Replace).await?;
        let deleted = self.store.get_node(active_id).await?;

        if !relinked.is_empty() {
            self.events.emit(GraphEvent::NodesUpdated { workflow_id, nodes: relinked });
        }
        self.events.emit(GraphEvent::NodeReplaced {
            workflow_id,
            deleted: deleted.clone(),
            restored: restored.clone(),
        });

        Ok(NodeSwap { deleted, restored })
    }

    // -----------------------------------------------------------------------
    // Delete / restore
    // -----------------------------------------------------------------------

    /// Soft delete. Successors keep pointing at the deleted node; a delete
    /// is expected to be followed by a move, or undone.
    #[instrument(skip(self, actor))]
    pub async fn delete_node(&self, actor: &Actor, node_id: NodeId) -> Result<Node, EngineError> {
        self.permissions
            .ensure(actor, Operation::DeleteNode, Scope::Node(node_id))?;

        let (node, _guard) = self.locked_node(node_id).await?;
        let node_type = self.node_type(&node.node_type)?;
        if node_type.is_trigger() {
            return Err(EngineError::TriggerDeletionDisallowed);
        }
        if self.has_guarded_successors(&node, node_type.as_ref()).await? {
            return Err(EngineError::NodeNotDeletable(node_id));
        }

        let entry = self.trash.trash(&node, TrashCategory::Delete).await?;
        let deleted = self.store.get_node(node_id).await?;

        info!(node_id = %node_id, "node deleted");
        if entry.category.announces_delete_and_create() {
            self.events.emit(GraphEvent::NodeDeleted {
                workflow_id: node.workflow_id,
                node_id,
            });
        }
        Ok(deleted)
    }

    /// Undo a delete. Refused when the node hung from a router branch that
    /// has been removed in the meantime.
    #[instrument(skip(self, actor))]
    pub async fn restore_node(&self, actor: &Actor, node_id: NodeId) -> Result<Node, EngineError> {
        self.permissions
            .ensure(actor, Operation::RestoreNode, Scope::Node(node_id))?;

        let workflow_id = self.store.get_node(node_id).await?.workflow_id;
        let _guard = self.locks.lock(workflow_id).await;
        let node = self.store.get_node(node_id).await?;
        if !node.trashed {
            return Err(EngineError::RestoreDisallowed(node_id, "node is not trashed".into()));
        }

        if let (Some(previous_id), false) = (node.previous_node_id, node.previous_node_output.is_empty()) {
            let previous = self.store.get_node(previous_id).await?;
            let previous_type = self.node_type(&previous.node_type)?;
            if !previous_type
                .output_keys(&previous.service)
                .contains(&node.previous_node_output)
            {
                warn!(node_id = %node_id, "branch of trashed node no longer exists");
                return Err(EngineError::RestoreDisallowed(
                    node_id,
                    "its branch has been deleted".into(),
                ));
            }
        }

        let restored = self.trash.restore(TrashCategory::Delete, node_id).await?;

        info!(node_id = %node_id, "node restored");
        self.events.emit(GraphEvent::NodeCreated { node: restored.clone() });
        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Order
    // -----------------------------------------------------------------------

    /// Assign dense display orders following `order`. Every id must be a
    /// node of the workflow within `scope`.
    #[instrument(skip(self, actor, order), fields(workflow_id = %workflow_id))]
    pub async fn order_nodes(
        &self,
        actor: &Actor,
        workflow_id: WorkflowId,
        scope: NodeScope,
        order: &[NodeId],
    ) -> Result<Vec<NodeId>, EngineError> {
        self.permissions
            .ensure(actor, Operation::OrderNodes, Scope::Workflow(workflow_id))?;

        let _guard = self.locks.lock(workflow_id).await;

        let mut nodes: Vec<Node> = self
            .store
            .nodes_of(workflow_id)
            .await?
            .into_iter()
            .filter(|n| scope.contains(n))
            .collect();

        let mut changes = NodeChanges::new();
        for (id, value) in order.iter().zip(dense_orders(order.len())) {
            let node = nodes
                .iter_mut()
                .find(|n| n.id == *id)
                .ok_or(EngineError::NodeNotInWorkflow { node_id: *id, workflow_id })?;
            node.order = value;
            changes.upsert(node.clone());
        }
        self.store.apply(changes).await?;

        self.events.emit(GraphEvent::NodesReordered {
            workflow_id,
            order: order.to_vec(),
        });
        Ok(order.to_vec())
    }
}

fn index_of(nodes: &[Node], id: NodeId) -> Result<usize, EngineError> {
    nodes
        .iter()
        .position(|n| n.id == id)
        .ok_or(EngineError::NodeNotFound(id))
}

/// Merge the allowed keys of `given` over the current settings.
fn merge_settings(node_type: &dyn NodeType, service: &mut ServiceDescriptor, given: &Value) {
    let allowed = node_type.allowed_fields();
    match (service.settings.as_object_mut(), given) {
        (Some(current), Value::Object(given)) => {
            for (key, value) in given {
                if allowed.is_empty() || allowed.contains(&key.as_str()) {
                    current.insert(key.clone(), value.clone());
                }
            }
        }
        _ => service.settings = node_type.prepare_settings(Some(given)),
    }
}
