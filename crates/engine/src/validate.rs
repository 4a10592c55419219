//! Graph validation: run this before importing or executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every node type must be registered.
//! 3. There is exactly one trigger, and it has no predecessor.
//! 4. Every back-pointer references a node of the workflow, and a non-empty
//!    branch key is one of the predecessor's outputs.
//! 5. Every node is reachable from the trigger (this also rules out cycles).
//!
//! Returns node IDs in walk order (breadth-first from the trigger) on
//! success.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use nodes::NodeTypeRegistry;

use crate::models::{Node, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIssue {
    #[error("duplicate node ID: {0}")]
    DuplicateNodeId(NodeId),

    #[error("node {node_id} has unknown type '{node_type}'")]
    UnknownNodeType { node_id: NodeId, node_type: String },

    #[error("workflow has no trigger")]
    MissingTrigger,

    #[error("workflow has {0} triggers")]
    MultipleTriggers(usize),

    #[error("trigger {0} must not have a predecessor")]
    TriggerHasPredecessor(NodeId),

    #[error("node {node_id} follows unknown node {previous_node_id}")]
    UnknownPredecessor { node_id: NodeId, previous_node_id: NodeId },

    #[error("node {0} has no predecessor")]
    MissingPredecessor(NodeId),

    #[error("node {node_id} follows branch '{output}', which its predecessor does not have")]
    UnknownBranch { node_id: NodeId, output: String },

    #[error("node {0} is not reachable from the trigger")]
    Unreachable(NodeId),
}

/// Validate a workflow's nodes and return them in walk order.
pub fn validate_graph(nodes: &[Node], registry: &NodeTypeRegistry) -> Result<Vec<NodeId>, GraphIssue> {
    // -----------------------------------------------------------------------
    // 1. Unique ids, 2. known types
    // -----------------------------------------------------------------------
    let mut by_id: HashMap<NodeId, &Node> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.id, node).is_some() {
            return Err(GraphIssue::DuplicateNodeId(node.id));
        }
    }

    let mut triggers = Vec::new();
    for node in nodes {
        let node_type = registry.get(&node.node_type).ok_or_else(|| GraphIssue::UnknownNodeType {
            node_id: node.id,
            node_type: node.node_type.clone(),
        })?;
        if node_type.is_trigger() {
            triggers.push(node);
        }
    }

    // -----------------------------------------------------------------------
    // 3. Exactly one trigger
    // -----------------------------------------------------------------------
    let trigger = match triggers.as_slice() {
        [] => return Err(GraphIssue::MissingTrigger),
        [trigger] => *trigger,
        many => return Err(GraphIssue::MultipleTriggers(many.len())),
    };
    if trigger.previous_node_id.is_some() {
        return Err(GraphIssue::TriggerHasPredecessor(trigger.id));
    }

    // -----------------------------------------------------------------------
    // 4. Back-pointers
    // -----------------------------------------------------------------------
    let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in nodes.iter().filter(|n| n.id != trigger.id) {
        let Some(previous_id) = node.previous_node_id else {
            return Err(GraphIssue::MissingPredecessor(node.id));
        };
        let previous = by_id.get(&previous_id).ok_or(GraphIssue::UnknownPredecessor {
            node_id: node.id,
            previous_node_id: previous_id,
        })?;
        if !node.previous_node_output.is_empty() {
            let outputs = registry
                .get(&previous.node_type)
                .map(|t| t.output_keys(&previous.service))
                .unwrap_or_default();
            if !outputs.contains(&node.previous_node_output) {
                return Err(GraphIssue::UnknownBranch {
                    node_id: node.id,
                    output: node.previous_node_output.clone(),
                });
            }
        }
        children.entry(previous_id).or_default().push(node.id);
    }

    // -----------------------------------------------------------------------
    // 5. Reachability from the trigger
    // -----------------------------------------------------------------------
    let mut visited: HashSet<NodeId> = HashSet::with_capacity(nodes.len());
    let mut queue = VecDeque::from([trigger.id]);
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        order.push(id);
        if let Some(next) = children.get(&id) {
            queue.extend(next.iter().copied());
        }
    }

    if let Some(stray) = nodes.iter().find(|n| !visited.contains(&n.id)) {
        return Err(GraphIssue::Unreachable(stray.id));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{action_node, registry};
    use serde_json::json;
    use uuid::Uuid;

    fn trigger() -> Node {
        let mut node = action_node(Uuid::nil(), None, "");
        node.node_type = "rows_created".into();
        node
    }

    #[test]
    fn linear_graph_is_walked_from_the_trigger() {
        let t = trigger();
        let a = action_node(Uuid::nil(), Some(t.id), "");
        let b = action_node(Uuid::nil(), Some(a.id), "");

        let order = validate_graph(&[b.clone(), a.clone(), t.clone()], &registry()).unwrap();
        assert_eq!(order, vec![t.id, a.id, b.id]);
    }

    #[test]
    fn router_branches_must_exist() {
        let t = trigger();
        let mut router = action_node(Uuid::nil(), Some(t.id), "");
        router.node_type = "router".into();
        router.service.settings = json!({ "edges": [{ "uid": "yes", "label": "Yes" }] });
        let ok = action_node(Uuid::nil(), Some(router.id), "yes");
        let bad = action_node(Uuid::nil(), Some(router.id), "gone");

        let registry = registry();
        assert!(validate_graph(&[t.clone(), router.clone(), ok.clone()], &registry).is_ok());
        assert!(matches!(
            validate_graph(&[t, router, ok, bad], &registry),
            Err(GraphIssue::UnknownBranch { output, .. }) if output == "gone"
        ));
    }

    #[test]
    fn dangling_back_pointer_is_reported() {
        let t = trigger();
        let a = action_node(Uuid::nil(), Some(Uuid::new_v4()), "");
        assert!(matches!(
            validate_graph(&[t, a], &registry()),
            Err(GraphIssue::UnknownPredecessor { .. })
        ));
    }

    #[test]
    fn cycle_is_unreachable() {
        let t = trigger();
        let mut a = action_node(Uuid::nil(), None, "");
        let b = action_node(Uuid::nil(), Some(a.id), "");
        a.previous_node_id = Some(b.id);

        assert!(matches!(
            validate_graph(&[t, a, b], &registry()),
            Err(GraphIssue::Unreachable(_))
        ));
    }

    #[test]
    fn trigger_count_is_checked() {
        assert_eq!(validate_graph(&[], &registry()), Err(GraphIssue::MissingTrigger));
        assert_eq!(
            validate_graph(&[trigger(), trigger()], &registry()),
            Err(GraphIssue::MultipleTriggers(2))
        );
    }
}
