//! `engine` crate: the workflow node-graph engine.
//!
//! - [`store`]: persistence seam (in-memory and SQL-backed).
//! - [`mutation`]: every structural edit of a workflow graph.
//! - [`dispatch`]: walks a graph from its trigger, honoring branches.
//! - [`run_control`]: admission (rate limit, circuit breaker) and the
//!   test-run / simulation lifecycle.
//! - [`workflows`]: workflow lifecycle, duplication and publishing.

pub mod models;
pub mod error;
pub mod store;
pub mod events;
pub mod permissions;
pub mod locks;
pub mod trash;
pub mod order;
pub mod mutation;
pub mod validate;
pub mod export;
pub mod dispatch;
pub mod run_control;
pub mod workflows;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{EngineError, ErrorKind};
pub use events::{EventBus, EventSink, GraphEvent, NullSink};
pub use export::{ExportedNode, ExportedWorkflow, IdMapping};
pub use locks::WorkflowLocks;
pub use models::{
    HistoryStatus, NewNode, Node, NodeId, NodeScope, RunHistoryEntry, Workflow, WorkflowId,
    WorkflowState,
};
pub use mutation::GraphMutator;
pub use permissions::{Actor, AllowAll, DenyAll, PermissionChecker};
pub use run_control::{RunControlConfig, RunController, RunReport, RunRequest, RunScheduler};
pub use store::{GraphStore, MemoryGraphStore, SqlGraphStore};
pub use validate::{validate_graph, GraphIssue};
pub use workflows::WorkflowHandler;

#[cfg(test)]
mod test_support;
