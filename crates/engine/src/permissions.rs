//! Permission check performed by every mutation and run entry point before
//! any state changes.

use std::fmt;

use uuid::Uuid;

use crate::EngineError;

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The engine acting on its own behalf (scheduled runs, publishing).
    pub fn system() -> Self {
        Self::new("system")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadNodes,
    CreateNode,
    UpdateNode,
    DeleteNode,
    RestoreNode,
    DuplicateNode,
    OrderNodes,
    CreateWorkflow,
    UpdateWorkflow,
    DeleteWorkflow,
    DuplicateWorkflow,
    OrderWorkflows,
    PublishWorkflow,
    TestWorkflow,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadNodes => "read_nodes",
            Self::CreateNode => "create_node",
            Self::UpdateNode => "update_node",
            Self::DeleteNode => "delete_node",
            Self::RestoreNode => "restore_node",
            Self::DuplicateNode => "duplicate_node",
            Self::OrderNodes => "order_nodes",
            Self::CreateWorkflow => "create_workflow",
            Self::UpdateWorkflow => "update_workflow",
            Self::DeleteWorkflow => "delete_workflow",
            Self::DuplicateWorkflow => "duplicate_workflow",
            Self::OrderWorkflows => "order_workflows",
            Self::PublishWorkflow => "publish_workflow",
            Self::TestWorkflow => "test_workflow",
        };
        f.write_str(name)
    }
}

/// What the operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Automation(Uuid),
    Workflow(Uuid),
    Node(Uuid),
}

pub trait PermissionChecker: Send + Sync {
    fn check(&self, actor: &Actor, operation: Operation, scope: Scope) -> bool;

    /// `check`, turned into an error on deny.
    fn ensure(&self, actor: &Actor, operation: Operation, scope: Scope) -> Result<(), EngineError> {
        if self.check(actor, operation, scope) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                actor: actor.id.clone(),
                operation: operation.to_string(),
            })
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check(&self, _actor: &Actor, _operation: Operation, _scope: Scope) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl PermissionChecker for DenyAll {
    fn check(&self, _actor: &Actor, _operation: Operation, _scope: Scope) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_becomes_an_error() {
        let actor = Actor::new("alice");
        let scope = Scope::Workflow(Uuid::new_v4());

        assert!(AllowAll.ensure(&actor, Operation::CreateNode, scope).is_ok());
        let err = DenyAll.ensure(&actor, Operation::CreateNode, scope).unwrap_err();
        assert_eq!(err.to_string(), "actor 'alice' may not create_node");
    }
}
