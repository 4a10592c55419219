//! The `Service` trait, the contract behind every node's business logic,
//! and the values that flow through a dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::NodeError;

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// The business-logic descriptor owned by a node.
///
/// Ownership is exclusive: duplicating a node deep-copies its descriptor under
/// a fresh `id`, and deleting a node deletes its descriptor with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: Uuid,
    /// Type-specific settings; only the node type knows their shape.
    pub settings: Value,
    /// The last dispatch result captured for the editor's "sample data".
    #[serde(default)]
    pub sample_data: Option<DispatchResult>,
}

impl ServiceDescriptor {
    pub fn new(settings: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            sample_data: None,
        }
    }

    /// Deep copy under a fresh id.
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings: self.settings.clone(),
            sample_data: self.sample_data.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchResult
// ---------------------------------------------------------------------------

/// What a service hands back after a successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub data: Value,
    /// Empty for non-branching nodes, otherwise the selected branch key.
    #[serde(default)]
    pub output_uid: String,
    #[serde(default = "default_status")]
    pub status: u16,
}

fn default_status() -> u16 {
    200
}

impl DispatchResult {
    /// A result on the default (non-branching) continuation.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            output_uid: String::new(),
            status: default_status(),
        }
    }

    /// A result that selects the branch `output_uid`.
    pub fn on_branch(data: Value, output_uid: impl Into<String>) -> Self {
        Self {
            data,
            output_uid: output_uid.into(),
            status: default_status(),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchContext
// ---------------------------------------------------------------------------

/// Per-run context passed to every service during a dispatch.
///
/// Defined here (in the nodes crate) so both the engine and individual service
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// ID of the workflow being walked.
    pub workflow_id: Uuid,
    /// ID of this run.
    pub run_id: Uuid,
    /// The triggering event payload, when the run comes from an event.
    pub event_payload: Option<Value>,
    /// Stop the walk once this node has been dispatched.
    pub simulate_until_node: Option<Uuid>,
    previous_nodes_results: HashMap<Uuid, Value>,
    dispatch_history: Vec<Uuid>,
}

impl DispatchContext {
    pub fn new(workflow_id: Uuid, event_payload: Option<Value>) -> Self {
        Self {
            workflow_id,
            run_id: Uuid::new_v4(),
            event_payload,
            simulate_until_node: None,
            previous_nodes_results: HashMap::new(),
            dispatch_history: Vec::new(),
        }
    }

    /// A context that halts once `node_id` has been dispatched.
    pub fn simulating_until(mut self, node_id: Uuid) -> Self {
        self.simulate_until_node = Some(node_id);
        self
    }

    /// Simulations replay stored sample data instead of re-running services.
    pub fn use_sample_data(&self) -> bool {
        self.simulate_until_node.is_some()
    }

    /// Whether the stored sample data of `node_id` must be refreshed.
    pub fn updates_sample_data_for(&self, node_id: Uuid) -> bool {
        self.simulate_until_node == Some(node_id)
    }

    /// Record a node's result so downstream nodes can reference it.
    pub fn after_dispatch(&mut self, node_id: Uuid, result: &DispatchResult) {
        self.dispatch_history.push(node_id);
        self.previous_nodes_results.insert(node_id, result.data.clone());
    }

    /// The data an upstream node produced earlier in this run.
    pub fn previous_result(&self, node_id: Uuid) -> Option<&Value> {
        self.previous_nodes_results.get(&node_id)
    }

    /// Node IDs in the order they were dispatched.
    pub fn dispatch_history(&self) -> &[Uuid] {
        &self.dispatch_history
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The opaque business logic behind a node.
///
/// All built-in services and externally registered ones implement this.
#[async_trait]
pub trait Service: Send + Sync {
    /// Run the service with the node's descriptor and the current run context.
    async fn dispatch(
        &self,
        service: &ServiceDescriptor,
        ctx: &DispatchContext,
    ) -> Result<DispatchResult, NodeError>;

    /// Whether a trigger backed by this service can produce its own payload,
    /// so a test run may start without waiting for an external event.
    fn can_immediately_be_tested(&self, _service: &ServiceDescriptor) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn after_dispatch_records_history_and_results() {
        let mut ctx = DispatchContext::new(Uuid::new_v4(), Some(json!({ "row": 1 })));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        ctx.after_dispatch(a, &DispatchResult::new(json!({ "a": true })));
        ctx.after_dispatch(b, &DispatchResult::on_branch(json!({ "b": true }), "k"));

        assert_eq!(ctx.dispatch_history(), &[a, b]);
        assert_eq!(ctx.previous_result(a), Some(&json!({ "a": true })));
        assert_eq!(ctx.previous_result(Uuid::new_v4()), None);
    }

    #[test]
    fn only_the_target_refreshes_sample_data() {
        let target = Uuid::new_v4();
        let ctx = DispatchContext::new(Uuid::new_v4(), None).simulating_until(target);

        assert!(ctx.use_sample_data());
        assert!(ctx.updates_sample_data_for(target));
        assert!(!ctx.updates_sample_data_for(Uuid::new_v4()));
    }

    #[test]
    fn sample_data_deserializes_with_defaults() {
        let result: DispatchResult = serde_json::from_value(json!({ "data": [1, 2] })).unwrap();
        assert_eq!(result.output_uid, "");
        assert_eq!(result.status, 200);
    }

    #[test]
    fn duplicate_descriptor_gets_fresh_id() {
        let original = ServiceDescriptor::new(json!({ "url": "https://example.com" }));
        let copy = original.duplicate();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.settings, original.settings);
    }
}
