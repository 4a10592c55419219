//! Generic action node type backed by an externally supplied [`Service`].
//!
//! HTTP requests, e-mails, row mutations and the like live outside this
//! crate; they are registered as `ServiceActionType`s so the engine can
//! dispatch them without knowing what they do.

use std::sync::Arc;

use crate::registry::{NodeCategory, NodeType};
use crate::Service;

pub struct ServiceActionType {
    name: String,
    service: Arc<dyn Service>,
}

impl ServiceActionType {
    pub fn new(name: impl Into<String>, service: Arc<dyn Service>) -> Self {
        Self {
            name: name.into(),
            service,
        }
    }
}

impl NodeType for ServiceActionType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Action
    }

    fn service(&self) -> Arc<dyn Service> {
        self.service.clone()
    }
}
