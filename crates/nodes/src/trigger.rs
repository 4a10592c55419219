//! Built-in trigger node types.
//!
//! A trigger's dispatch hands the triggering event payload to the rest of
//! the graph. Periodic triggers can also produce their own payload, which is
//! why a test run of a periodic workflow starts immediately.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::registry::{NodeCategory, NodeType};
use crate::{DispatchContext, DispatchResult, NodeError, Service, ServiceDescriptor};

// ---------------------------------------------------------------------------
// Event triggers
// ---------------------------------------------------------------------------

/// Passes the event payload through.
#[derive(Debug, Default)]
pub struct EventTriggerService;

#[async_trait]
impl Service for EventTriggerService {
    async fn dispatch(
        &self,
        _service: &ServiceDescriptor,
        ctx: &DispatchContext,
    ) -> Result<DispatchResult, NodeError> {
        match &ctx.event_payload {
            Some(payload) => Ok(DispatchResult::new(payload.clone())),
            None => Err(NodeError::NotDispatchable),
        }
    }
}

/// A trigger fired by an external event source (row changes, webhooks, ...).
pub struct EventTriggerType {
    name: String,
    service: Arc<EventTriggerService>,
}

impl EventTriggerType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: Arc::new(EventTriggerService),
        }
    }
}

impl NodeType for EventTriggerType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Trigger
    }

    fn service(&self) -> Arc<dyn Service> {
        self.service.clone()
    }
}

// ---------------------------------------------------------------------------
// Periodic trigger
// ---------------------------------------------------------------------------

/// Uses the event payload when there is one, otherwise emits a tick.
#[derive(Debug, Default)]
pub struct PeriodicTriggerService;

#[async_trait]
impl Service for PeriodicTriggerService {
    async fn dispatch(
        &self,
        _service: &ServiceDescriptor,
        ctx: &DispatchContext,
    ) -> Result<DispatchResult, NodeError> {
        let data = match &ctx.event_payload {
            Some(payload) => payload.clone(),
            None => json!({ "triggered_at": Utc::now().to_rfc3339() }),
        };
        Ok(DispatchResult::new(data))
    }

    fn can_immediately_be_tested(&self, _service: &ServiceDescriptor) -> bool {
        true
    }
}

pub struct PeriodicTriggerType {
    service: Arc<PeriodicTriggerService>,
}

impl Default for PeriodicTriggerType {
    fn default() -> Self {
        Self {
            service: Arc::new(PeriodicTriggerService),
        }
    }
}

impl NodeType for PeriodicTriggerType {
    fn type_name(&self) -> &str {
        "periodic"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Trigger
    }

    fn service(&self) -> Arc<dyn Service> {
        self.service.clone()
    }

    fn immediate_dispatch(&self) -> bool {
        true
    }

    fn allowed_fields(&self) -> &[&'static str] {
        &["interval", "minute", "hour", "day_of_week", "day_of_month"]
    }

    fn default_settings(&self) -> serde_json::Value {
        json!({ "interval": "hour", "minute": 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn event_trigger_passes_payload_through() {
        let ctx = DispatchContext::new(Uuid::new_v4(), Some(json!([{ "id": 7 }])));
        let service = ServiceDescriptor::new(json!({}));

        let result = EventTriggerService.dispatch(&service, &ctx).await.unwrap();
        assert_eq!(result.data, json!([{ "id": 7 }]));
        assert_eq!(result.output_uid, "");
    }

    #[tokio::test]
    async fn event_trigger_without_payload_waits_for_event() {
        let ctx = DispatchContext::new(Uuid::new_v4(), None);
        let service = ServiceDescriptor::new(json!({}));

        let err = EventTriggerService.dispatch(&service, &ctx).await.unwrap_err();
        assert_eq!(err, NodeError::NotDispatchable);
        assert!(!EventTriggerService.can_immediately_be_tested(&service));
    }

    #[tokio::test]
    async fn periodic_trigger_generates_its_own_payload() {
        let ctx = DispatchContext::new(Uuid::new_v4(), None);
        let service = ServiceDescriptor::new(json!({}));

        let result = PeriodicTriggerService.dispatch(&service, &ctx).await.unwrap();
        assert!(result.data.get("triggered_at").is_some());
        assert!(PeriodicTriggerService.can_immediately_be_tested(&service));
    }
}
