//! The router: a conditional action node with named output branches.
//!
//! Settings shape:
//!
//! ```json
//! {
//!   "edges": [{ "uid": "…", "label": "Branch", "condition": true }],
//!   "default_edge_label": "Default"
//! }
//! ```
//!
//! Edges are evaluated top-to-bottom; the first truthy condition selects its
//! `uid` as the output branch. When none match, the default (empty) output is
//! used and the result data names the default label.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::registry::{NodeCategory, NodeType};
use crate::{DispatchContext, DispatchResult, NodeError, Service, ServiceDescriptor};

const DEFAULT_EDGE_LABEL: &str = "Default";
const INITIAL_EDGE_LABEL: &str = "Branch";

/// One labelled branch of a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterEdge {
    pub uid: String,
    pub label: String,
    #[serde(default)]
    pub condition: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouterSettings {
    #[serde(default)]
    edges: Vec<RouterEdge>,
    #[serde(default = "default_edge_label")]
    default_edge_label: String,
}

fn default_edge_label() -> String {
    DEFAULT_EDGE_LABEL.to_owned()
}

impl RouterSettings {
    fn parse(service: &ServiceDescriptor) -> Result<Self, NodeError> {
        serde_json::from_value(service.settings.clone())
            .map_err(|e| NodeError::Misconfigured(format!("invalid router settings: {e}")))
    }
}

/// Literal truthiness of a condition value.
///
/// Conditions arrive already evaluated; only their truth value matters here.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim().trim_matches('\'').trim_matches('"').to_ascii_lowercase();
            matches!(s.as_str(), "true" | "1" | "yes" | "y" | "on" | "checked")
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// RouterService
// ---------------------------------------------------------------------------

/// Selects the first edge whose condition holds.
#[derive(Debug, Default)]
pub struct RouterService;

#[async_trait]
impl Service for RouterService {
    async fn dispatch(
        &self,
        service: &ServiceDescriptor,
        _ctx: &DispatchContext,
    ) -> Result<DispatchResult, NodeError> {
        let settings = RouterSettings::parse(service)?;

        if let Some(edge) = settings.edges.iter().find(|e| is_truthy(&e.condition)) {
            if edge.uid.is_empty() {
                return Err(NodeError::Misconfigured(format!(
                    "router edge '{}' has no uid",
                    edge.label
                )));
            }
            debug!(edge = %edge.label, uid = %edge.uid, "router edge selected");
            return Ok(DispatchResult::on_branch(
                json!({ "edge": { "label": edge.label } }),
                edge.uid.clone(),
            ));
        }

        debug!(edge = %settings.default_edge_label, "no router condition held, using default");
        Ok(DispatchResult::new(
            json!({ "edge": { "label": settings.default_edge_label } }),
        ))
    }
}

// ---------------------------------------------------------------------------
// RouterNodeType
// ---------------------------------------------------------------------------

pub struct RouterNodeType {
    service: Arc<RouterService>,
}

impl Default for RouterNodeType {
    fn default() -> Self {
        Self {
            service: Arc::new(RouterService),
        }
    }
}

fn edges_of(service: &ServiceDescriptor) -> Vec<RouterEdge> {
    RouterSettings::parse(service)
        .map(|s| s.edges)
        .unwrap_or_default()
}

impl NodeType for RouterNodeType {
    fn type_name(&self) -> &str {
        "router"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Action
    }

    fn service(&self) -> Arc<dyn Service> {
        self.service.clone()
    }

    // Routers cannot be moved to a new position.
    fn is_fixed(&self) -> bool {
        true
    }

    fn allowed_fields(&self) -> &[&'static str] {
        &["edges", "default_edge_label"]
    }

    fn default_settings(&self) -> Value {
        json!({ "edges": [], "default_edge_label": DEFAULT_EDGE_LABEL })
    }

    /// Start every new router with one branch to fill in.
    fn after_create(&self, service: &mut ServiceDescriptor) {
        let Some(settings) = service.settings.as_object_mut() else {
            return;
        };
        let edges = settings
            .entry("edges")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(edges) = edges {
            if edges.is_empty() {
                edges.push(json!({
                    "uid": Uuid::new_v4().to_string(),
                    "label": INITIAL_EDGE_LABEL,
                    "condition": "",
                }));
            }
        }
    }

    fn guarded_outputs(&self, service: &ServiceDescriptor) -> Option<Vec<String>> {
        let mut outputs = vec![String::new()];
        outputs.extend(self.output_keys(service));
        Some(outputs)
    }

    fn output_keys(&self, service: &ServiceDescriptor) -> Vec<String> {
        edges_of(service).into_iter().map(|e| e.uid).collect()
    }

    fn remap_ids(&self, service: &mut ServiceDescriptor, outputs: &mut HashMap<String, String>) {
        let Some(Value::Array(edges)) = service.settings.get_mut("edges") else {
            return;
        };
        for edge in edges.iter_mut() {
            let Some(old) = edge.get("uid").and_then(Value::as_str).map(str::to_owned) else {
                continue;
            };
            let new = outputs
                .entry(old)
                .or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            edge["uid"] = Value::String(new);
        }
    }
}
