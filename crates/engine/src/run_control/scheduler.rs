//! Fire-and-forget hand-off of runs, so event sources never wait on a
//! dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{NodeId, WorkflowId};
use crate::EngineError;

/// One run waiting to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub workflow_id: WorkflowId,
    pub payload: Option<Value>,
    pub simulate_until: Option<NodeId>,
}

#[async_trait]
pub trait RunScheduler: Send + Sync {
    async fn schedule_run(&self, request: RunRequest) -> Result<(), EngineError>;
}
