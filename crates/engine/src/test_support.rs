//! Shared fixtures for the engine's unit and scenario tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use nodes::mock::MockService;
use nodes::{NodeTypeRegistry, ServiceDescriptor};

use crate::models::{NewNode, Node, NodeId, Workflow, WorkflowId};
use crate::mutation::GraphMutator;
use crate::permissions::Actor;
use crate::run_control::{RunRequest, RunScheduler};
use crate::store::{GraphStore, MemoryGraphStore, NodeChanges};
use crate::EngineError;

/// Built-ins plus two mock-backed actions.
pub fn registry() -> NodeTypeRegistry {
    let mut registry = NodeTypeRegistry::with_builtins();
    registry.register_action("http_request", Arc::new(MockService::returning(json!({ "ok": true }))));
    registry.register_action("send_email", Arc::new(MockService::returning(json!({ "sent": true }))));
    registry
}

pub fn action_node(workflow_id: WorkflowId, previous: Option<NodeId>, output: &str) -> Node {
    Node {
        id: Uuid::new_v4(),
        workflow_id,
        parent_node_id: None,
        node_type: "http_request".into(),
        label: String::new(),
        previous_node_id: previous,
        previous_node_output: output.into(),
        order: 1.0,
        service: ServiceDescriptor::new(json!({})),
        trashed: false,
        created_at: Utc::now(),
    }
}

/// A draft workflow with a `rows_created` trigger.
pub struct Fixture {
    pub store: Arc<dyn GraphStore>,
    pub mutator: GraphMutator,
    pub actor: Actor,
    pub workflow: Workflow,
    pub trigger: Node,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryGraphStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn GraphStore>) -> Self {
        Self::with_registry(store, registry()).await
    }

    pub async fn with_registry(store: Arc<dyn GraphStore>, registry: NodeTypeRegistry) -> Self {
        let mutator = GraphMutator::new(store.clone(), Arc::new(registry));
        let automation_id = Uuid::new_v4();
        let (workflow, trigger) = seed_workflow(&store, automation_id, "Flow").await;
        Self {
            store,
            mutator,
            actor: Actor::new("tester"),
            workflow,
            trigger,
        }
    }

    /// Another workflow in the same automation and store.
    pub async fn add_workflow(&self, name: &str) -> (Workflow, Node) {
        seed_workflow(&self.store, self.workflow.automation_id, name).await
    }

    /// Append an `http_request` node after the last node.
    pub async fn append(&self, label: &str) -> Node {
        self.mutator
            .create_node(
                &self.actor,
                "http_request",
                self.workflow.id,
                None,
                NewNode {
                    label: label.into(),
                    ..NewNode::default()
                },
            )
            .await
            .unwrap()
    }

    /// Add a node of `type_name` following `previous` on `output`.
    pub async fn attach(&self, type_name: &str, previous: NodeId, output: &str) -> Node {
        self.mutator
            .create_node(
                &self.actor,
                type_name,
                self.workflow.id,
                None,
                NewNode {
                    previous_node_id: Some(previous),
                    previous_node_output: Some(output.into()),
                    ..NewNode::default()
                },
            )
            .await
            .unwrap()
    }

    /// Current stored state of a node, trashed or not.
    pub async fn node(&self, id: NodeId) -> Node {
        self.store.get_node(id).await.unwrap()
    }

    pub async fn workflow(&self) -> Workflow {
        self.store.get_workflow(self.workflow.id).await.unwrap()
    }
}

async fn seed_workflow(store: &Arc<dyn GraphStore>, automation_id: Uuid, name: &str) -> (Workflow, Node) {
    let workflow = Workflow::new(automation_id, name, 1);
    store.insert_workflow(&workflow).await.unwrap();

    let mut trigger = action_node(workflow.id, None, "");
    trigger.node_type = "rows_created".into();
    let mut changes = NodeChanges::new();
    changes.upsert(trigger.clone());
    store.apply(changes).await.unwrap();

    (workflow, trigger)
}

/// Collects scheduled runs instead of running them.
#[derive(Default)]
pub struct RecordingScheduler {
    requests: std::sync::Mutex<Vec<RunRequest>>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunScheduler for RecordingScheduler {
    async fn schedule_run(&self, request: RunRequest) -> Result<(), EngineError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}
