//! Display-order arithmetic. Orders only sort siblings for display; they
//! never influence execution.

use crate::models::Node;

/// An order after every node of `nodes`.
pub fn last_order(nodes: &[Node]) -> f64 {
    nodes
        .iter()
        .map(|n| n.order)
        .fold(None, |max: Option<f64>, o| Some(max.map_or(o, |m| m.max(o))))
        .map_or(1.0, |max| max.floor() + 1.0)
}

/// An order strictly between `before` and the closest lower order among
/// nodes sharing its parent.
pub fn order_before(nodes: &[Node], before: &Node) -> f64 {
    let lower = nodes
        .iter()
        .filter(|n| n.id != before.id && n.parent_node_id == before.parent_node_id)
        .map(|n| n.order)
        .filter(|o| *o < before.order)
        .fold(None, |max: Option<f64>, o| Some(max.map_or(o, |m| m.max(o))));

    match lower {
        Some(lower) => (lower + before.order) / 2.0,
        None => before.order - 1.0,
    }
}

/// Dense orders `1, 2, 3, …` for `count` items.
pub fn dense_orders(count: usize) -> impl Iterator<Item = f64> {
    (1..=count).map(|i| i as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nodes::ServiceDescriptor;
    use serde_json::json;
    use uuid::Uuid;

    fn node(order: f64) -> Node {
        Node {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            parent_node_id: None,
            node_type: "x".into(),
            label: String::new(),
            previous_node_id: None,
            previous_node_output: String::new(),
            order,
            service: ServiceDescriptor::new(json!({})),
            trashed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn last_is_after_everything() {
        assert_eq!(last_order(&[]), 1.0);
        assert_eq!(last_order(&[node(1.0), node(2.5)]), 3.0);
    }

    #[test]
    fn before_lands_between_neighbours() {
        let nodes = vec![node(1.0), node(2.0), node(3.0)];
        let order = order_before(&nodes, &nodes[2]);
        assert!(order > 2.0 && order < 3.0);

        assert_eq!(order_before(&nodes, &nodes[0]), 0.0);
    }

    #[test]
    fn dense_orders_count_from_one() {
        assert_eq!(dense_orders(3).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }
}
