//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request would break a graph invariant. Never retried.
    Structural,
    /// A run was refused before it started.
    Admission,
    /// A node failed while a run was walking the graph.
    Dispatch,
    Permission,
    Infrastructure,
}

/// Errors produced by the graph engine (mutation, dispatch, run control).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Structural errors ------

    /// `before` is in another workflow or is the trigger.
    #[error("invalid `before` node: {0}")]
    BeforeInvalid(String),

    #[error("node {0} cannot be moved")]
    NodeNotMovable(Uuid),

    #[error("node {0} cannot be replaced: {1}")]
    NodeNotReplaceable(Uuid, String),

    #[error("node {0} cannot be deleted while output nodes are attached")]
    NodeNotDeletable(Uuid),

    #[error("trigger nodes cannot be created directly, replace the existing trigger instead")]
    TriggerCreationDisallowed,

    #[error("trigger nodes cannot be deleted")]
    TriggerDeletionDisallowed,

    #[error("node {node_id} is not part of workflow {workflow_id}")]
    NodeNotInWorkflow { node_id: Uuid, workflow_id: Uuid },

    #[error("node {0} does not exist")]
    NodeNotFound(Uuid),

    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("workflow {0} does not exist")]
    WorkflowNotFound(Uuid),

    #[error("workflow {workflow_id} is not part of automation {automation_id}")]
    WorkflowNotInAutomation { workflow_id: Uuid, automation_id: Uuid },

    #[error("node {node_id} still has nodes attached to output '{output}'")]
    NodeOutputInUse { node_id: Uuid, output: String },

    #[error("node {0} cannot be restored: {1}")]
    RestoreDisallowed(Uuid, String),

    #[error("a workflow named '{name}' already exists in automation {automation_id}")]
    WorkflowNameNotUnique { name: String, automation_id: Uuid },

    #[error("workflow {0} has no trigger")]
    MissingTrigger(Uuid),

    // ------ Admission errors ------

    #[error("workflow {0} exceeded its rate limit")]
    RateLimited(Uuid),

    #[error("workflow {0} failed too many times in a row and was disabled")]
    TooManyConsecutiveErrors(Uuid),

    // ------ Dispatch errors ------

    #[error("node {node_id} is misconfigured: {message}")]
    NodeMisconfigured { node_id: Uuid, message: String },

    #[error("node {node_id} failed: {message}")]
    DispatchFailed { node_id: Uuid, message: String },

    // ------ Permission errors ------

    #[error("actor '{actor}' may not {operation}")]
    PermissionDenied { actor: String, operation: String },

    // ------ Infrastructure errors ------

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a domain value.
    #[error("invalid stored value: {0}")]
    InvalidRow(String),

    /// The run hand-off is gone (queue closed).
    #[error("run could not be scheduled: {0}")]
    Scheduling(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BeforeInvalid(_)
            | Self::NodeNotMovable(_)
            | Self::NodeNotReplaceable(..)
            | Self::NodeNotDeletable(_)
            | Self::TriggerCreationDisallowed
            | Self::TriggerDeletionDisallowed
            | Self::NodeNotInWorkflow { .. }
            | Self::NodeNotFound(_)
            | Self::UnknownNodeType(_)
            | Self::WorkflowNotFound(_)
            | Self::WorkflowNotInAutomation { .. }
            | Self::WorkflowNameNotUnique { .. }
            | Self::NodeOutputInUse { .. }
            | Self::RestoreDisallowed(..)
            | Self::MissingTrigger(_) => ErrorKind::Structural,
            Self::RateLimited(_) | Self::TooManyConsecutiveErrors(_) => ErrorKind::Admission,
            Self::NodeMisconfigured { .. } | Self::DispatchFailed { .. } => ErrorKind::Dispatch,
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::Database(_)
            | Self::Serialization(_)
            | Self::InvalidRow(_)
            | Self::Scheduling(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified() {
        let id = Uuid::new_v4();
        assert_eq!(EngineError::NodeNotMovable(id).kind(), ErrorKind::Structural);
        assert_eq!(EngineError::RateLimited(id).kind(), ErrorKind::Admission);
        assert_eq!(
            EngineError::NodeMisconfigured { node_id: id, message: "x".into() }.kind(),
            ErrorKind::Dispatch
        );
        assert_eq!(
            EngineError::InvalidRow("bad uuid".into()).kind(),
            ErrorKind::Infrastructure
        );
    }
}
