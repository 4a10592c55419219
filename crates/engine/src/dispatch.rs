//! Dispatch Engine.
//!
//! `Dispatcher` walks a workflow top-down from a starting node:
//! 1. Dispatches the node's service with the run's `DispatchContext`.
//! 2. Records the result in the context for downstream nodes.
//! 3. Stops the whole walk once the simulate-until target has run.
//! 4. Otherwise queues the successors on the branch the result selected.
//!
//! The walk uses an explicit depth-first worklist, so a chain runs strictly
//! in sequence and sibling branches run one after another.

use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use nodes::{DispatchContext, DispatchResult, NodeError, NodeTypeRegistry};

use crate::events::{EventSink, GraphEvent, NullSink};
use crate::models::{Node, NodeId};
use crate::store::{GraphStore, NodeChanges};
use crate::EngineError;

/// What a walk did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Every dispatched node with its result, in dispatch order.
    pub results: Vec<(NodeId, DispatchResult)>,
    /// Set when the walk stopped at a simulate-until target.
    pub halted_at: Option<NodeId>,
}

impl DispatchOutcome {
    pub fn dispatched(&self) -> Vec<NodeId> {
        self.results.iter().map(|(id, _)| *id).collect()
    }

    pub fn result_of(&self, node_id: NodeId) -> Option<&DispatchResult> {
        self.results
            .iter()
            .find(|(id, _)| *id == node_id)
            .map(|(_, result)| result)
    }
}

pub struct Dispatcher {
    store: Arc<dyn GraphStore>,
    registry: Arc<NodeTypeRegistry>,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn GraphStore>, registry: Arc<NodeTypeRegistry>) -> Self {
        Self {
            store,
            registry,
            events: Arc::new(NullSink),
        }
    }

    /// Observers are told when a simulation refreshes a node's sample data.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Walk the graph from `start`.
    ///
    /// # Errors
    /// `NodeMisconfigured` when a service reports bad configuration,
    /// `DispatchFailed` for any other service failure, and store errors.
    #[instrument(skip(self, start, ctx), fields(workflow_id = %start.workflow_id, start = %start.id))]
    pub async fn dispatch_node(
        &self,
        start: &Node,
        ctx: &mut DispatchContext,
    ) -> Result<DispatchOutcome, EngineError> {
        let mut outcome = DispatchOutcome::default();
        let mut worklist = vec![start.clone()];

        while let Some(node) = worklist.pop() {
            let result = self.dispatch_one(&node, ctx).await?;
            ctx.after_dispatch(node.id, &result);

            if ctx.updates_sample_data_for(node.id) {
                self.store_sample_data(&node, &result).await?;
                info!(node_id = %node.id, "simulation reached its target");
                outcome.results.push((node.id, result));
                outcome.halted_at = Some(node.id);
                break;
            }

            let mut next = self
                .store
                .successors_of(node.workflow_id, Some(node.id), Some(&result.output_uid))
                .await?;
            outcome.results.push((node.id, result));

            // Popped from the back, so the first sibling runs first.
            next.reverse();
            worklist.extend(next);
        }

        Ok(outcome)
    }

    async fn dispatch_one(
        &self,
        node: &Node,
        ctx: &DispatchContext,
    ) -> Result<DispatchResult, EngineError> {
        if ctx.use_sample_data() && !ctx.updates_sample_data_for(node.id) {
            if let Some(sample) = &node.service.sample_data {
                debug!(node_id = %node.id, "replaying sample data");
                return Ok(sample.clone());
            }
        }

        let node_type = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node.node_type.clone()))?;

        debug!(node_id = %node.id, node_type = %node.node_type, "dispatching");
        node_type
            .service()
            .dispatch(&node.service, ctx)
            .await
            .map_err(|err| {
                error!(node_id = %node.id, node_type = %node.node_type, error = %err, "dispatch failed");
                match err {
                    NodeError::Misconfigured(message) => EngineError::NodeMisconfigured {
                        node_id: node.id,
                        message,
                    },
                    other => EngineError::DispatchFailed {
                        node_id: node.id,
                        message: other.to_string(),
                    },
                }
            })
    }

    async fn store_sample_data(&self, node: &Node, result: &DispatchResult) -> Result<(), EngineError> {
        let mut node = self.store.get_node(node.id).await?;
        node.service.sample_data = Some(result.clone());
        let mut changes = NodeChanges::new();
        changes.upsert(node.clone());
        self.store.apply(changes).await?;
        self.events.emit(GraphEvent::NodeUpdated { node });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{registry, Fixture};
    use crate::events::EventBus;
    use nodes::mock::MockService;
    use serde_json::json;

    fn registry_with(name: &str, service: MockService) -> (NodeTypeRegistry, Arc<MockService>) {
        let service = Arc::new(service);
        let mut registry = registry();
        registry.register_action(name, service.clone());
        (registry, service)
    }

    #[tokio::test]
    async fn walks_chain_in_order() {
        let fx = Fixture::new().await;
        let a = fx.append("A").await;
        let b = fx.append("B").await;

        let dispatcher = Dispatcher::new(fx.store.clone(), fx.mutator.registry().clone());
        let mut ctx = DispatchContext::new(fx.workflow.id, Some(json!({ "row": 1 })));
        let outcome = dispatcher.dispatch_node(&fx.trigger, &mut ctx).await.unwrap();

        assert_eq!(outcome.dispatched(), vec![fx.trigger.id, a.id, b.id]);
        assert_eq!(outcome.result_of(fx.trigger.id).unwrap().data, json!({ "row": 1 }));
        assert_eq!(ctx.dispatch_history(), &[fx.trigger.id, a.id, b.id]);
        assert!(outcome.halted_at.is_none());
    }

    #[tokio::test]
    async fn only_selected_branch_runs() {
        let (registry, _) = registry_with("pick", MockService::branching(json!({}), "left"));
        let fx = Fixture::with_registry(Arc::new(crate::store::MemoryGraphStore::new()), registry).await;
        let pick = fx.attach("pick", fx.trigger.id, "").await;
        let left = fx.attach("http_request", pick.id, "left").await;
        let right = fx.attach("http_request", pick.id, "right").await;
        let default = fx.attach("send_email", pick.id, "").await;

        let dispatcher = Dispatcher::new(fx.store.clone(), fx.mutator.registry().clone());
        let mut ctx = DispatchContext::new(fx.workflow.id, Some(json!({})));
        let outcome = dispatcher.dispatch_node(&fx.trigger, &mut ctx).await.unwrap();

        let ran = outcome.dispatched();
        assert!(ran.contains(&left.id));
        assert!(!ran.contains(&right.id));
        assert!(!ran.contains(&default.id));
    }

    #[tokio::test]
    async fn misconfigured_service_is_translated() {
        let (registry, service) = registry_with("broken", MockService::misconfigured("no table"));
        let fx = Fixture::with_registry(Arc::new(crate::store::MemoryGraphStore::new()), registry).await;
        let broken = fx.attach("broken", fx.trigger.id, "").await;
        let after = fx.attach("http_request", broken.id, "").await;

        let dispatcher = Dispatcher::new(fx.store.clone(), fx.mutator.registry().clone());
        let mut ctx = DispatchContext::new(fx.workflow.id, Some(json!({})));
        let err = dispatcher.dispatch_node(&fx.trigger, &mut ctx).await.unwrap_err();

        assert!(matches!(err, EngineError::NodeMisconfigured { node_id, .. } if node_id == broken.id));
        assert_eq!(service.call_count(), 1);
        assert!(!ctx.dispatch_history().contains(&after.id));
    }

    #[tokio::test]
    async fn other_failures_become_dispatch_failed() {
        let (registry, _) = registry_with("flaky", MockService::failing("timeout"));
        let fx = Fixture::with_registry(Arc::new(crate::store::MemoryGraphStore::new()), registry).await;
        fx.attach("flaky", fx.trigger.id, "").await;

        let dispatcher = Dispatcher::new(fx.store.clone(), fx.mutator.registry().clone());
        let mut ctx = DispatchContext::new(fx.workflow.id, Some(json!({})));
        let err = dispatcher.dispatch_node(&fx.trigger, &mut ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::DispatchFailed { .. }));
    }

    #[tokio::test]
    async fn simulation_replays_sample_data_before_target() {
        let (registry, service) = registry_with("lookup", MockService::returning(json!({ "live": true })));
        let fx = Fixture::with_registry(Arc::new(crate::store::MemoryGraphStore::new()), registry).await;
        let a = fx.attach("lookup", fx.trigger.id, "").await;
        let b = fx.attach("lookup", a.id, "").await;

        // Give A recorded sample data; B is the target.
        let mut stored = fx.node(a.id).await;
        stored.service.sample_data = Some(DispatchResult::new(json!({ "sample": true })));
        let mut changes = NodeChanges::new();
        changes.upsert(stored);
        fx.store.apply(changes).await.unwrap();

        let mut trigger = fx.node(fx.trigger.id).await;
        trigger.service.sample_data = Some(DispatchResult::new(json!({ "row": 1 })));
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let dispatcher =
            Dispatcher::new(fx.store.clone(), fx.mutator.registry().clone()).with_events(bus.clone());
        let mut ctx = DispatchContext::new(fx.workflow.id, None).simulating_until(b.id);
        let outcome = dispatcher.dispatch_node(&trigger, &mut ctx).await.unwrap();

        assert_eq!(outcome.halted_at, Some(b.id));
        assert_eq!(outcome.result_of(a.id).unwrap().data, json!({ "sample": true }));
        assert_eq!(service.call_count(), 1);
        assert!(service.was_called_for(b.service.id));
        let refreshed = fx.node(b.id).await;
        assert_eq!(
            refreshed.service.sample_data.as_ref().unwrap().data,
            json!({ "live": true })
        );

        // Editors hear about the refreshed sample, and only about that.
        assert_eq!(events.try_recv().unwrap(), GraphEvent::NodeUpdated { node: refreshed });
        assert!(events.try_recv().is_err());
    }
}
