//! `MockService`: a test double for [`Service`].
//!
//! Useful in unit and integration tests where real business logic is either
//! unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::{DispatchContext, DispatchResult, NodeError, Service, ServiceDescriptor};

/// Behaviour injected into `MockService` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value on the default output.
    ReturnValue(Value),
    /// Return a specific JSON value on the named branch.
    ReturnBranch(Value, String),
    /// Fail with a `Misconfigured` error.
    FailMisconfigured(String),
    /// Fail with a generic `Failed` error.
    Fail(String),
}

/// A mock service that records every call it receives and returns a
/// programmer-specified result.
pub struct MockService {
    /// What the service will do when `dispatch` is called.
    pub behaviour: MockBehaviour,
    /// Reported by `can_immediately_be_tested`.
    pub immediate: bool,
    /// Descriptor IDs seen by this service (in call order).
    pub calls: Arc<Mutex<Vec<Uuid>>>,
}

impl MockService {
    fn with(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            immediate: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with(MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always selects `output_uid`.
    pub fn branching(value: Value, output_uid: impl Into<String>) -> Self {
        Self::with(MockBehaviour::ReturnBranch(value, output_uid.into()))
    }

    /// Create a mock that always fails as misconfigured.
    pub fn misconfigured(msg: impl Into<String>) -> Self {
        Self::with(MockBehaviour::FailMisconfigured(msg.into()))
    }

    /// Create a mock that always fails.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with(MockBehaviour::Fail(msg.into()))
    }

    /// Report the service as immediately testable.
    pub fn immediately_testable(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Number of times this service has been dispatched.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the descriptor `service_id` has been dispatched.
    pub fn was_called_for(&self, service_id: Uuid) -> bool {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).contains(&service_id)
    }
}

#[async_trait]
impl Service for MockService {
    async fn dispatch(
        &self,
        service: &ServiceDescriptor,
        _ctx: &DispatchContext,
    ) -> Result<DispatchResult, NodeError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(service.id);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(DispatchResult::new(v.clone())),
            MockBehaviour::ReturnBranch(v, uid) => Ok(DispatchResult::on_branch(v.clone(), uid.clone())),
            MockBehaviour::FailMisconfigured(msg) => Err(NodeError::Misconfigured(msg.clone())),
            MockBehaviour::Fail(msg) => Err(NodeError::Failed(msg.clone())),
        }
    }

    fn can_immediately_be_tested(&self, _service: &ServiceDescriptor) -> bool {
        self.immediate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_calls_per_descriptor() {
        let mock = MockService::branching(json!({ "ok": true }), "yes");
        let service = ServiceDescriptor::new(json!({}));
        let ctx = DispatchContext::new(Uuid::new_v4(), None);

        let result = mock.dispatch(&service, &ctx).await.unwrap();
        assert_eq!(result.output_uid, "yes");
        assert_eq!(mock.call_count(), 1);
        assert!(mock.was_called_for(service.id));
    }

    #[tokio::test]
    async fn failures_keep_their_class() {
        let service = ServiceDescriptor::new(json!({}));
        let ctx = DispatchContext::new(Uuid::new_v4(), None);

        let err = MockService::misconfigured("no table").dispatch(&service, &ctx).await;
        assert!(matches!(err, Err(NodeError::Misconfigured(_))));

        let err = MockService::failing("boom").dispatch(&service, &ctx).await;
        assert!(matches!(err, Err(NodeError::Failed(_))));
    }
}
