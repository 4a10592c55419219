//! `nodes` crate: the node-type registry, the `Service` business-logic trait
//! and the built-in node types.
//!
//! Every node in a workflow graph carries a type name. The engine resolves
//! that name through a [`NodeTypeRegistry`] to learn the type's capabilities
//! (trigger or action, movable, immediately dispatchable, ...) and to reach
//! the [`Service`] that performs the node's business logic.

pub mod error;
pub mod traits;
pub mod registry;
pub mod router;
pub mod trigger;
pub mod action;
pub mod mock;

pub use error::NodeError;
pub use registry::{NodeCategory, NodeType, NodeTypeRegistry};
pub use traits::{DispatchContext, DispatchResult, Service, ServiceDescriptor};
