//! Core domain models for the graph engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. The graph is stored through back-pointers only: a node names its
//! predecessor and the output branch of that predecessor it hangs from.
//! Successor lists are never stored, they are queried.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nodes::ServiceDescriptor;

pub type NodeId = Uuid;
pub type WorkflowId = Uuid;
pub type AutomationId = Uuid;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single step in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub workflow_id: WorkflowId,
    /// Set when the node lives inside a container owned by another node.
    pub parent_node_id: Option<NodeId>,
    /// Discriminant resolved through the node-type registry.
    pub node_type: String,
    pub label: String,
    /// `None` only for the trigger.
    pub previous_node_id: Option<NodeId>,
    /// Branch of the predecessor this node follows; empty is the default
    /// continuation.
    pub previous_node_output: String,
    /// Display order among siblings. Never used for execution.
    pub order: f64,
    pub service: ServiceDescriptor,
    pub trashed: bool,
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Whether this node hangs from `previous_node_id` on branch `output`.
    pub fn follows(&self, previous_node_id: Option<NodeId>, output: &str) -> bool {
        self.previous_node_id == previous_node_id && self.previous_node_output == output
    }

    pub fn next_values(&self) -> NextNodeValues {
        NextNodeValues {
            id: self.id,
            previous_node_id: self.previous_node_id,
            previous_node_output: self.previous_node_output.clone(),
        }
    }

    /// Point this node at a new predecessor slot.
    pub(crate) fn relink(&mut self, previous_node_id: Option<NodeId>, output: &str) {
        self.previous_node_id = previous_node_id;
        self.previous_node_output = output.to_owned();
    }
}

/// Fields accepted when creating a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub parent_node_id: Option<NodeId>,
    /// Explicit predecessor. Defaults to the predecessor of `before`, or to
    /// the last node of the workflow.
    #[serde(default)]
    pub previous_node_id: Option<NodeId>,
    #[serde(default)]
    pub previous_node_output: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
}

/// Fields accepted when updating a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub label: Option<String>,
    /// Merged key by key over the current settings; keys the node type does
    /// not allow are dropped.
    pub settings: Option<Value>,
}

/// The back-pointer of one node, used to report and revert relinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextNodeValues {
    pub id: NodeId,
    pub previous_node_id: Option<NodeId>,
    pub previous_node_output: String,
}

/// Everything a move changed, enough to invert it exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMove {
    pub node: Node,
    /// Origin and destination successors that were relinked.
    pub next_node_updates: Vec<Node>,
    pub origin_previous_node_id: Option<NodeId>,
    pub origin_previous_node_output: String,
    pub origin_old_next_nodes_values: Vec<NextNodeValues>,
    pub origin_new_next_nodes_values: Vec<NextNodeValues>,
    pub destination_previous_node_id: Option<NodeId>,
    pub destination_previous_node_output: String,
    pub destination_old_next_nodes_values: Vec<NextNodeValues>,
    pub destination_new_next_nodes_values: Vec<NextNodeValues>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDuplication {
    pub source: Node,
    /// Default-branch successors of the source before the duplication.
    pub source_next_nodes_values: Vec<NextNodeValues>,
    pub duplicate: Node,
    /// The same successors, now following the duplicate.
    pub duplicate_next_nodes_values: Vec<NextNodeValues>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplacedNode {
    pub node: Node,
    pub original_node_id: NodeId,
    pub original_node_type: String,
}

/// Outcome of undoing or redoing a replace.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSwap {
    pub deleted: Node,
    pub restored: Node,
}

/// Which nodes of a workflow an ordering applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeScope {
    #[default]
    All,
    TopLevel,
    ChildrenOf(NodeId),
}

impl NodeScope {
    pub fn contains(&self, node: &Node) -> bool {
        match self {
            Self::All => true,
            Self::TopLevel => node.parent_node_id.is_none(),
            Self::ChildrenOf(parent) => node.parent_node_id == Some(*parent),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Whether real events may start a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Draft,
    Live,
    /// Stopped by a user; admission treats it like `Disabled`.
    Paused,
    /// Stopped by the circuit breaker or a user.
    Disabled,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Live => "live",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft"    => Ok(Self::Draft),
            "live"     => Ok(Self::Live),
            "paused"   => Ok(Self::Paused),
            "disabled" => Ok(Self::Disabled),
            other      => Err(format!("unknown workflow state: {other}")),
        }
    }
}

/// A workflow: one connected node graph rooted at its trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub automation_id: AutomationId,
    /// Unique within the automation, trashed workflows included.
    pub name: String,
    pub order: i64,
    pub state: WorkflowState,
    /// While in the future, the next matching event runs this draft once.
    pub allow_test_run_until: Option<DateTime<Utc>>,
    /// While set, the next run halts after this node.
    pub simulate_until_node: Option<NodeId>,
    /// Set on published copies: the draft they were published from.
    pub published_from: Option<WorkflowId>,
    pub trashed: bool,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(automation_id: AutomationId, name: impl Into<String>, order: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            automation_id,
            name: name.into(),
            order,
            state: WorkflowState::Draft,
            allow_test_run_until: None,
            simulate_until_node: None,
            published_from: None,
            trashed: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_published_copy(&self) -> bool {
        self.published_from.is_some()
    }

    pub fn test_run_armed(&self, now: DateTime<Utc>) -> bool {
        self.allow_test_run_until.is_some_and(|until| until >= now)
    }

    pub fn simulation_armed(&self) -> bool {
        self.simulate_until_node.is_some()
    }

    /// Whether a matching event should start this workflow.
    pub fn accepts_events(&self, now: DateTime<Utc>) -> bool {
        self.state == WorkflowState::Live || self.test_run_armed(now) || self.simulation_armed()
    }
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Started,
    Success,
    Error,
    /// The run was refused by the circuit breaker, which disabled the workflow.
    Disabled,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started"  => Ok(Self::Started),
            "success"  => Ok(Self::Success),
            "error"    => Ok(Self::Error),
            "disabled" => Ok(Self::Disabled),
            other      => Err(format!("unknown history status: {other}")),
        }
    }
}

/// One record per non-simulated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub id: Uuid,
    /// Always the original (draft) workflow, even for published runs.
    pub workflow_id: WorkflowId,
    pub started_on: DateTime<Utc>,
    pub completed_on: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub message: String,
    pub is_test_run: bool,
}

impl RunHistoryEntry {
    pub fn started(workflow_id: WorkflowId, is_test_run: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            started_on: Utc::now(),
            completed_on: None,
            status: HistoryStatus::Started,
            message: String::new(),
            is_test_run,
        }
    }

    pub fn close(&mut self, status: HistoryStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.completed_on = Some(Utc::now());
    }
}
