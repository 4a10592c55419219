//! Workflow handler: lifecycle of workflows as a whole.
//!
//! Node-level edits go through [`crate::mutation::GraphMutator`]; this
//! handler creates workflows (with their trigger), renames, trashes,
//! orders, duplicates and publishes them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use nodes::{NodeTypeRegistry, ServiceDescriptor};

use crate::events::{EventSink, GraphEvent, NullSink};
use crate::export::{export_workflow, import_workflow, IdMapping};
use crate::locks::WorkflowLocks;
use crate::models::{AutomationId, Node, Workflow, WorkflowId, WorkflowState};
use crate::permissions::{Actor, AllowAll, Operation, PermissionChecker, Scope};
use crate::store::{GraphStore, NodeChanges};
use crate::EngineError;

/// Trigger a new workflow starts with.
pub const DEFAULT_TRIGGER_TYPE: &str = "periodic";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    /// Applied to the published copy when there is one.
    pub state: Option<WorkflowState>,
}

pub struct WorkflowHandler {
    store: Arc<dyn GraphStore>,
    registry: Arc<NodeTypeRegistry>,
    events: Arc<dyn EventSink>,
    permissions: Arc<dyn PermissionChecker>,
    locks: WorkflowLocks,
}

impl WorkflowHandler {
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<NodeTypeRegistry>) -> Self {
        Self {
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

    /// Share locks with the mutator so publishing never sees a half-done
    /// node edit.
    pub fn with_locks(mut self, locks: WorkflowLocks) -> Self {
        self.locks = locks;
        self
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        self.store.get_workflow(workflow_id).await
    }

    pub async fn workflows_of(&self, automation_id: AutomationId) -> Result<Vec<Workflow>, EngineError> {
        self.store.workflows_of(automation_id, false).await
    }

    /// The live copy of a draft, if it was ever published.
    pub async fn get_published_workflow(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, EngineError> {
        self.store.published_of(workflow_id).await
    }

    /// The draft behind a published copy; a draft is its own original.
    pub async fn get_original_workflow(&self, workflow: &Workflow) -> Result<Workflow, EngineError> {
        self.store.original_of(workflow).await
    }

    /// `proposed`, or `proposed 2`, `proposed 3`, ... whichever is free.
    /// Trashed workflows keep their names reserved.
    pub async fn find_unused_name(
        &self,
        automation_id: AutomationId,
        proposed: &str,
    ) -> Result<String, EngineError> {
        let taken: HashSet<String> = self
            .store
            .workflows_of(automation_id, true)
            .await?
            .into_iter()
            .map(|w| w.name)
            .collect();

        if !taken.contains(proposed) {
            return Ok(proposed.to_owned());
        }
        let mut n = 2;
        loop {
            let candidate = format!("{proposed} {n}");
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    async fn next_order(&self, automation_id: AutomationId) -> Result<i64, EngineError> {
        let workflows = self.store.workflows_of(automation_id, true).await?;
        Ok(workflows.iter().map(|w| w.order).max().unwrap_or(0) + 1)
    }

    // -----------------------------------------------------------------------
    // Create / update / delete
    // -----------------------------------------------------------------------

    /// Create a draft with a trigger of `trigger_type` (periodic by default).
    #[instrument(skip(self, actor))]
    pub async fn create_workflow(
        &self,
        actor: &Actor,
        automation_id: AutomationId,
        name: &str,
        trigger_type: Option<&str>,
    ) -> Result<(Workflow, Node), EngineError> {
        self.permissions
            .ensure(actor, Operation::CreateWorkflow, Scope::Automation(automation_id))?;

        let type_name = trigger_type.unwrap_or(DEFAULT_TRIGGER_TYPE);
        let node_type = self
            .registry
            .get(type_name)
            .filter(|t| t.is_trigger())
            .ok_or_else(|| EngineError::UnknownNodeType(type_name.to_owned()))?;

        let name = self.find_unused_name(automation_id, name).await?;
        let workflow = Workflow::new(automation_id, name, self.next_order(automation_id).await?);
        self.store.insert_workflow(&workflow).await?;

        let mut service = ServiceDescriptor::new(node_type.prepare_settings(None));
        node_type.after_create(&mut service);
        let trigger = Node {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            parent_node_id: None,
            node_type: type_name.to_owned(),
            label: String::new(),
            previous_node_id: None,
            previous_node_output: String::new(),
            order: 1.0,
            service,
            trashed: false,
            created_at: Utc::now(),
        };
        let mut changes = NodeChanges::new();
        changes.upsert(trigger.clone());
        self.store.apply(changes).await?;

        info!(workflow_id = %workflow.id, name = %workflow.name, "workflow created");
        self.events.emit(GraphEvent::WorkflowCreated { workflow: workflow.clone() });
        Ok((workflow, trigger))
    }

    #[instrument(skip(self, actor, update))]
    pub async fn update_workflow(
        &self,
        actor: &Actor,
        workflow_id: WorkflowId,
        update: WorkflowUpdate,
    ) -> Result<Workflow, EngineError> {
        self.permissions
            .ensure(actor, Operation::UpdateWorkflow, Scope::Workflow(workflow_id))?;

        let mut workflow = self.store.get_workflow(workflow_id).await?;

        if let Some(state) = update.state {
            match self.store.published_of(workflow_id).await? {
                Some(mut published) => {
                    published.state = state;
                    self.store.save_workflow(&published).await?;
                    self.events.emit(GraphEvent::WorkflowUpdated { workflow: published });
                }
                None => workflow.state = state,
            }
        }

        if let Some(name) = update.name.filter(|n| *n != workflow.name) {
            let taken = self
                .store
                .workflows_of(workflow.automation_id, true)
                .await?
                .iter()
                .any(|w| w.id != workflow.id && w.name == name);
            if taken {
                return Err(EngineError::WorkflowNameNotUnique {
                    name,
                    automation_id: workflow.automation_id,
                });
            }
            workflow.name = name;
        }

        self.store.save_workflow(&workflow).await?;
        self.events.emit(GraphEvent::WorkflowUpdated { workflow: workflow.clone() });
        Ok(workflow)
    }

    /// Trash a draft. Its published copy is deleted outright.
    #[instrument(skip(self, actor))]
    pub async fn delete_workflow(&self, actor: &Actor, workflow_id: WorkflowId) -> Result<(), EngineError> {
        self.permissions
            .ensure(actor, Operation::DeleteWorkflow, Scope::Workflow(workflow_id))?;

        let _guard = self.locks.lock(workflow_id).await;
        let mut workflow = self.store.get_workflow(workflow_id).await?;

        for published in self.store.published_copies_of(workflow_id).await? {
            self.store.delete_workflow(published.id).await?;
        }

        workflow.trashed = true;
        self.store.save_workflow(&workflow).await?;

        info!(workflow_id = %workflow_id, "workflow trashed");
        self.events.emit(GraphEvent::WorkflowDeleted { workflow_id });
        Ok(())
    }

    pub async fn restore_workflow(&self, actor: &Actor, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        self.permissions
            .ensure(actor, Operation::DeleteWorkflow, Scope::Workflow(workflow_id))?;

        let mut workflow = self.store.get_workflow(workflow_id).await?;
        workflow.trashed = false;
        self.store.save_workflow(&workflow).await?;

        self.events.emit(GraphEvent::WorkflowCreated { workflow: workflow.clone() });
        Ok(workflow)
    }

    /// Assign orders 1..n following `order`.
    pub async fn order_workflows(
        &self,
        actor: &Actor,
        automation_id: AutomationId,
        order: &[WorkflowId],
    ) -> Result<Vec<WorkflowId>, EngineError> {
        self.permissions
            .ensure(actor, Operation::OrderWorkflows, Scope::Automation(automation_id))?;

        let workflows = self.store.workflows_of(automation_id, false).await?;
        let mut updated = Vec::with_capacity(order.len());
        for (position, id) in order.iter().enumerate() {
            let mut workflow = workflows
                .iter()
                .find(|w| w.id == *id)
                .cloned()
                .ok_or(EngineError::WorkflowNotInAutomation { workflow_id: *id, automation_id })?;
            workflow.order = position as i64 + 1;
            updated.push(workflow);
        }
        for workflow in &updated {
            self.store.save_workflow(workflow).await?;
        }

        self.events.emit(GraphEvent::WorkflowsReordered { order: order.to_vec() });
        Ok(order.to_vec())
    }

    // -----------------------------------------------------------------------
    // Copies
    // -----------------------------------------------------------------------

    /// A new draft with copies of every node under fresh ids.
    #[instrument(skip(self, actor))]
    pub async fn duplicate_workflow(&self, actor: &Actor, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        self.permissions
            .ensure(actor, Operation::DuplicateWorkflow, Scope::Workflow(workflow_id))?;

        let source = self.store.get_workflow(workflow_id).await?;
        let exported = export_workflow(self.store.as_ref(), workflow_id).await?;

        let name = self.find_unused_name(source.automation_id, &source.name).await?;
        let mut copy = Workflow::new(source.automation_id, name, self.next_order(source.automation_id).await?);
        copy.state = WorkflowState::Draft;

        let (copy, _) =
            import_workflow(self.store.as_ref(), &self.registry, copy, &exported, &mut IdMapping::new())
                .await?;

        self.events.emit(GraphEvent::WorkflowCreated { workflow: copy.clone() });
        Ok(copy)
    }

    /// Snapshot a draft into a new live copy.
    ///
    /// Older copies are deleted except the newest, which is disabled. The
    /// whole operation holds the draft's lock.
    #[instrument(skip(self, actor))]
    pub async fn publish(&self, actor: &Actor, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        self.permissions
            .ensure(actor, Operation::PublishWorkflow, Scope::Workflow(workflow_id))?;

        let _guard = self.locks.lock(workflow_id).await;
        let source = self.store.get_workflow(workflow_id).await?;

        let mut previous = self.store.published_copies_of(workflow_id).await?;
        if let Some(mut newest) = previous.pop() {
            for old in previous {
                self.store.delete_workflow(old.id).await?;
            }
            newest.state = WorkflowState::Disabled;
            self.store.save_workflow(&newest).await?;
        }

        let exported = export_workflow(self.store.as_ref(), workflow_id).await?;
        let mut published = Workflow::new(source.automation_id, source.name.clone(), source.order);
        published.state = WorkflowState::Live;
        published.published_from = Some(source.id);

        let (published, nodes) =
            import_workflow(self.store.as_ref(), &self.registry, published, &exported, &mut IdMapping::new())
                .await?;

        info!(workflow_id = %workflow_id, published_id = %published.id, nodes = nodes.len(), "workflow published");
        self.events.emit(GraphEvent::WorkflowPublished {
            source: workflow_id,
            published: published.clone(),
        });
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{registry, Fixture};

    fn handler(fx: &Fixture) -> WorkflowHandler {
        WorkflowHandler::new(fx.store.clone(), Arc::new(registry()))
    }

    #[tokio::test]
    async fn names_stay_unique_across_trash() {
        let fx = Fixture::new().await;
        let wh = handler(&fx);
        let automation = fx.workflow.automation_id;

        let (second, trigger) = wh.create_workflow(&fx.actor, automation, "Flow", None).await.unwrap();
        assert_eq!(second.name, "Flow 2");
        assert_eq!(trigger.node_type, DEFAULT_TRIGGER_TYPE);
        assert_eq!(fx.store.trigger_of(second.id).await.unwrap().unwrap().id, trigger.id);

        wh.delete_workflow(&fx.actor, second.id).await.unwrap();
        assert_eq!(wh.workflows_of(automation).await.unwrap().len(), 1);

        let (third, _) = wh.create_workflow(&fx.actor, automation, "Flow", None).await.unwrap();
        assert_eq!(third.name, "Flow 3");

        let err = wh
            .update_workflow(&fx.actor, third.id, WorkflowUpdate { name: Some("Flow 2".into()), state: None })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNameNotUnique { .. }));
    }

    #[tokio::test]
    async fn creating_with_an_action_type_is_refused() {
        let fx = Fixture::new().await;
        let err = handler(&fx)
            .create_workflow(&fx.actor, fx.workflow.automation_id, "X", Some("http_request"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType(_)));
    }

    #[tokio::test]
    async fn publish_keeps_one_disabled_previous_copy() {
        let fx = Fixture::new().await;
        fx.append("A").await;
        let wh = handler(&fx);

        let first = wh.publish(&fx.actor, fx.workflow.id).await.unwrap();
        assert_eq!(first.state, WorkflowState::Live);
        assert_eq!(first.published_from, Some(fx.workflow.id));
        assert_eq!(fx.store.nodes_of(first.id).await.unwrap().len(), 2);

        let second = wh.publish(&fx.actor, fx.workflow.id).await.unwrap();
        let third = wh.publish(&fx.actor, fx.workflow.id).await.unwrap();

        let copies = fx.store.published_copies_of(fx.workflow.id).await.unwrap();
        assert_eq!(copies.iter().map(|w| w.id).collect::<Vec<_>>(), vec![second.id, third.id]);
        assert_eq!(copies[0].state, WorkflowState::Disabled);
        assert!(fx.store.get_workflow(first.id).await.is_err());

        assert_eq!(wh.get_published_workflow(fx.workflow.id).await.unwrap().unwrap().id, third.id);
        assert_eq!(wh.get_original_workflow(&third).await.unwrap().id, fx.workflow.id);
        // Published copies never show up as drafts.
        assert_eq!(wh.workflows_of(fx.workflow.automation_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn state_update_targets_the_published_copy() {
        let fx = Fixture::new().await;
        let wh = handler(&fx);
        let published = wh.publish(&fx.actor, fx.workflow.id).await.unwrap();

        let draft = wh
            .update_workflow(&fx.actor, fx.workflow.id, WorkflowUpdate { name: None, state: Some(WorkflowState::Paused) })
            .await
            .unwrap();
        assert_eq!(draft.state, WorkflowState::Draft);
        assert_eq!(fx.store.get_workflow(published.id).await.unwrap().state, WorkflowState::Paused);
    }

    #[tokio::test]
    async fn duplicate_copies_nodes_under_new_ids() {
        let fx = Fixture::new().await;
        let a = fx.append("A").await;
        let wh = handler(&fx);

        let copy = wh.duplicate_workflow(&fx.actor, fx.workflow.id).await.unwrap();
        assert_eq!(copy.name, "Flow 2");

        let nodes = fx.store.nodes_of(copy.id).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.id != a.id && n.id != fx.trigger.id));
        assert!(nodes.iter().any(|n| n.label == "A"));
    }

    #[tokio::test]
    async fn order_rejects_foreign_workflows() {
        let fx = Fixture::new().await;
        let wh = handler(&fx);
        let (other, _) = fx.add_workflow("Other").await;

        let order = wh
            .order_workflows(&fx.actor, fx.workflow.automation_id, &[other.id, fx.workflow.id])
            .await
            .unwrap();
        assert_eq!(order, vec![other.id, fx.workflow.id]);
        assert_eq!(fx.workflow().await.order, 2);

        let err = wh
            .order_workflows(&fx.actor, fx.workflow.automation_id, &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotInAutomation { .. }));
    }
}
