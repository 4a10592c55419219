//! Node-type registry.
//!
//! A node's `kind` is a discriminant string. The registry maps it to a
//! [`NodeType`], which answers capability questions (category, movability,
//! immediate dispatch), supplies per-type hooks (settings preparation,
//! post-create defaults, id remapping on import) and owns the [`Service`]
//! that performs the node's business logic.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::ServiceActionType;
use crate::router::RouterNodeType;
use crate::trigger::{EventTriggerType, PeriodicTriggerType};
use crate::{Service, ServiceDescriptor};

// ---------------------------------------------------------------------------
// NodeCategory
// ---------------------------------------------------------------------------

/// The two disjoint categories of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry point; exactly one per workflow.
    Trigger,
    /// Orderable, movable, deletable step.
    Action,
}

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// Capabilities and hooks of one registered node type.
pub trait NodeType: Send + Sync {
    /// The discriminant string stored on each node.
    fn type_name(&self) -> &str;

    fn category(&self) -> NodeCategory;

    /// The business logic behind nodes of this type.
    fn service(&self) -> Arc<dyn Service>;

    fn is_trigger(&self) -> bool {
        self.category() == NodeCategory::Trigger
    }

    /// Fixed nodes cannot be moved to a new position.
    fn is_fixed(&self) -> bool {
        self.is_trigger()
    }

    /// A trigger that is dispatched immediately on a test run instead of
    /// waiting for an external event.
    fn immediate_dispatch(&self) -> bool {
        false
    }

    /// Settings keys accepted from callers. Empty means "accept any".
    fn allowed_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Settings a freshly created node starts with.
    fn default_settings(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Called once right after a node of this type is created.
    fn after_create(&self, _service: &mut ServiceDescriptor) {}

    /// Nodes attached to these outputs keep this node from being deleted or
    /// replaced. `None` means the type does not guard its outputs.
    fn guarded_outputs(&self, _service: &ServiceDescriptor) -> Option<Vec<String>> {
        None
    }

    /// The named branch keys this node may select.
    fn output_keys(&self, _service: &ServiceDescriptor) -> Vec<String> {
        Vec::new()
    }

    /// Rewrite ids embedded in the settings when importing a copy. Any
    /// branch key that changes is recorded in `outputs` (old -> new) so the
    /// `previous_node_output` of children can be rewritten consistently.
    fn remap_ids(&self, _service: &mut ServiceDescriptor, _outputs: &mut HashMap<String, String>) {}

    /// Whether a node of this type may be replaced by one of `other`.
    fn is_replaceable_with(&self, other: &dyn NodeType) -> bool {
        self.category() == other.category()
    }

    /// Output keys that an update from `old` to `new` settings drops.
    fn removed_outputs(&self, old: &ServiceDescriptor, new: &ServiceDescriptor) -> Vec<String> {
        let kept = self.output_keys(new);
        self.output_keys(old)
            .into_iter()
            .filter(|key| !kept.contains(key))
            .collect()
    }

    /// Merge caller-provided settings over the defaults, keeping only the
    /// allowed keys.
    fn prepare_settings(&self, provided: Option<&Value>) -> Value {
        let mut settings = self.default_settings();
        if let (Some(target), Some(Value::Object(given))) = (settings.as_object_mut(), provided) {
            let allowed = self.allowed_fields();
            for (key, value) in given {
                if allowed.is_empty() || allowed.contains(&key.as_str()) {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        settings
    }
}

// ---------------------------------------------------------------------------
// NodeTypeRegistry
// ---------------------------------------------------------------------------

/// Maps `node_type` strings to registered [`NodeType`] implementations.
#[derive(Clone, Default)]
pub struct NodeTypeRegistry {
    types: HashMap<String, Arc<dyn NodeType>>,
}

impl NodeTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in triggers and the router.
    ///
    /// Action types whose business logic lives outside this crate are added
    /// with [`NodeTypeRegistry::register_action`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in ["rows_created", "rows_updated", "rows_deleted", "http_trigger"] {
            registry.register(EventTriggerType::new(name));
        }
        registry.register(PeriodicTriggerType::default());
        registry.register(RouterNodeType::default());
        registry
    }

    pub fn register<T: NodeType + 'static>(&mut self, node_type: T) -> &mut Self {
        self.types
            .insert(node_type.type_name().to_owned(), Arc::new(node_type));
        self
    }

    /// Register an action type backed by an external service.
    pub fn register_action(
        &mut self,
        type_name: impl Into<String>,
        service: Arc<dyn Service>,
    ) -> &mut Self {
        self.register(ServiceActionType::new(type_name, service))
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn NodeType>> {
        self.types.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
