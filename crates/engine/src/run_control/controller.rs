//! `RunController`: admission, execution and the test-run lifecycle.
//!
//! A run of workflow `W` goes through:
//! 1. A history entry (status `Started`) opened against `W`'s original
//!    draft, unless the run is a simulation.
//! 2. Admission: the draft's test/simulate arm is consumed, then the
//!    circuit breaker and the rate limiter are consulted.
//! 3. Dispatch from `W`'s trigger.
//! 4. The history entry closed as `Success`, `Error` or `Disabled`.
//!
//! Failures never escape step 4 with the entry still `Started`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use nodes::{DispatchContext, DispatchResult, NodeTypeRegistry};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::events::{EventSink, GraphEvent, NullSink};
use crate::models::{
    HistoryStatus, Node, NodeId, RunHistoryEntry, Workflow, WorkflowId, WorkflowState,
};
use crate::permissions::{Actor, AllowAll, Operation, PermissionChecker, Scope};
use crate::store::{GraphStore, NodeChanges};
use crate::{EngineError, ErrorKind};

use super::{CircuitBreaker, RateLimiter, RunControlConfig, RunRequest, RunScheduler};

/// How a finished (or refused) run ended.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow_id: WorkflowId,
    /// `None` for simulations, which are not recorded.
    pub history_id: Option<Uuid>,
    pub status: HistoryStatus,
    pub message: String,
    pub dispatch: Option<DispatchOutcome>,
}

/// What [`RunController::toggle_test_run`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRunToggle {
    /// An arm was already set and has been cleared.
    Cancelled,
    /// Armed; the next matching event starts the run.
    Armed,
    /// Armed and handed to the scheduler right away.
    Started,
}

pub struct RunController {
    store: Arc<dyn GraphStore>,
    registry: Arc<NodeTypeRegistry>,
    dispatcher: Dispatcher,
    scheduler: Arc<dyn RunScheduler>,
    config: RunControlConfig,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    events: Arc<dyn EventSink>,
    permissions: Arc<dyn PermissionChecker>,
}

impl RunController {
    pub fn new(
        store: Arc<dyn GraphStore>,
        registry: Arc<NodeTypeRegistry>,
        scheduler: Arc<dyn RunScheduler>,
        config: RunControlConfig,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(store.clone(), registry.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit_window(), config.rate_limit_max_runs),
            breaker: CircuitBreaker::new(config.max_consecutive_errors),
            store,
            registry,
            scheduler,
            config,
            events: Arc::new(NullSink),
            permissions: Arc::new(AllowAll),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.dispatcher = Dispatcher::new(self.store.clone(), self.registry.clone())
            .with_events(events.clone());
        self.events = events;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn config(&self) -> &RunControlConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Run `workflow_id` now.
    ///
    /// Admission and dispatch failures end up in the report and in history;
    /// only failures to read the workflow or to write history are returned
    /// as errors.
    #[instrument(skip(self, payload), fields(workflow_id = %workflow_id))]
    pub async fn start_workflow(
        &self,
        workflow_id: WorkflowId,
        payload: Option<Value>,
        simulate_until: Option<NodeId>,
    ) -> Result<RunReport, EngineError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        let original = self.store.original_of(&workflow).await?;
        let is_test_run = original.id == workflow.id;
        let simulating = simulate_until.is_some();

        let mut history = None;
        if !simulating {
            let entry = RunHistoryEntry::started(original.id, is_test_run);
            self.store.insert_history(&entry).await?;
            history = Some(entry);
        }

        let (status, message, dispatch) = match self
            .admit_and_dispatch(&workflow, &original, payload, simulate_until)
            .await
        {
            Ok(outcome) => (HistoryStatus::Success, String::new(), Some(outcome)),
            Err(err @ EngineError::TooManyConsecutiveErrors(_)) => {
                warn!(workflow_id = %original.id, "circuit breaker tripped, disabling workflow");
                if let Err(disable_err) = self.disable_workflow(&workflow).await {
                    error!(workflow_id = %workflow.id, error = %disable_err, "failed to disable workflow");
                }
                (HistoryStatus::Disabled, err.to_string(), None)
            }
            Err(err) if matches!(err.kind(), ErrorKind::Admission | ErrorKind::Dispatch) => {
                info!(workflow_id = %workflow.id, error = %err, "run failed");
                (HistoryStatus::Error, err.to_string(), None)
            }
            Err(err) => {
                let message = format!(
                    "Unexpected error while running workflow {}. Error: {err}",
                    original.id
                );
                error!(workflow_id = %workflow.id, error = ?err, "{message}");
                (HistoryStatus::Error, message, None)
            }
        };

        let mut history_id = None;
        if let Some(mut entry) = history {
            entry.close(status, message.clone());
            self.store.save_history(&entry).await?;
            history_id = Some(entry.id);
        }

        Ok(RunReport {
            workflow_id,
            history_id,
            status,
            message,
            dispatch,
        })
    }

    async fn admit_and_dispatch(
        &self,
        workflow: &Workflow,
        original: &Workflow,
        payload: Option<Value>,
        simulate_until: Option<NodeId>,
    ) -> Result<DispatchOutcome, EngineError> {
        self.before_run(original, simulate_until.is_some()).await?;

        let trigger = self
            .store
            .trigger_of(workflow.id)
            .await?
            .ok_or(EngineError::MissingTrigger(workflow.id))?;

        let mut ctx = DispatchContext::new(workflow.id, payload);
        if let Some(target) = simulate_until {
            ctx = ctx.simulating_until(target);
        }
        self.dispatcher.dispatch_node(&trigger, &mut ctx).await
    }

    /// Admission checks, in order: consume the draft's arm flags, then the
    /// circuit breaker, then the rate limit. Simulations only consume the
    /// flags.
    pub async fn before_run(&self, original: &Workflow, simulating: bool) -> Result<(), EngineError> {
        self.reset_temporary_states(original.id).await?;
        if simulating {
            return Ok(());
        }

        let recent = self
            .store
            .recent_history(original.id, self.breaker.history_needed())
            .await?;
        if self.breaker.trips(&recent) {
            return Err(EngineError::TooManyConsecutiveErrors(original.id));
        }

        if !self.rate_limiter.try_acquire(original.id, Utc::now()) {
            warn!(workflow_id = %original.id, "rate limit exceeded");
            return Err(EngineError::RateLimited(original.id));
        }
        Ok(())
    }

    /// Disable `workflow` and, for a published copy, its draft too.
    pub async fn disable_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let mut ids = vec![workflow.id];
        if let Some(source) = workflow.published_from {
            ids.push(source);
        }
        for id in ids {
            let mut current = self.store.get_workflow(id).await?;
            current.state = WorkflowState::Disabled;
            self.store.save_workflow(&current).await?;
            self.events.emit(GraphEvent::WorkflowUpdated { workflow: current });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Test runs and simulations
    // -----------------------------------------------------------------------

    /// Arm the next event to run the draft, or halt at `simulate_until`.
    pub async fn set_temporary_states(
        &self,
        workflow_id: WorkflowId,
        simulate_until: Option<NodeId>,
    ) -> Result<Workflow, EngineError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;
        match simulate_until {
            Some(node_id) => workflow.simulate_until_node = Some(node_id),
            None => {
                workflow.allow_test_run_until = Some(Utc::now() + self.config.test_run_duration());
            }
        }
        self.store.save_workflow(&workflow).await?;
        self.events.emit(GraphEvent::WorkflowUpdated { workflow: workflow.clone() });
        Ok(workflow)
    }

    /// Clear both arm flags; a no-op when neither is set.
    pub async fn reset_temporary_states(&self, workflow_id: WorkflowId) -> Result<Workflow, EngineError> {
        let mut workflow = self.store.get_workflow(workflow_id).await?;
        if workflow.allow_test_run_until.is_none() && workflow.simulate_until_node.is_none() {
            return Ok(workflow);
        }
        workflow.allow_test_run_until = None;
        workflow.simulate_until_node = None;
        self.store.save_workflow(&workflow).await?;
        self.events.emit(GraphEvent::WorkflowUpdated { workflow: workflow.clone() });
        Ok(workflow)
    }

    /// Start a test run (or a simulation up to `simulate_until`), or cancel
    /// the one already armed.
    #[instrument(skip(self, actor), fields(workflow_id = %workflow_id))]
    pub async fn toggle_test_run(
        &self,
        actor: &Actor,
        workflow_id: WorkflowId,
        simulate_until: Option<NodeId>,
    ) -> Result<TestRunToggle, EngineError> {
        self.permissions
            .ensure(actor, Operation::TestWorkflow, Scope::Workflow(workflow_id))?;

        let workflow = self.store.get_workflow(workflow_id).await?;
        if workflow.simulate_until_node.is_some() || workflow.allow_test_run_until.is_some() {
            self.reset_temporary_states(workflow_id).await?;
            return Ok(TestRunToggle::Cancelled);
        }

        let trigger = self
            .store
            .trigger_of(workflow_id)
            .await?
            .ok_or(EngineError::MissingTrigger(workflow_id))?;
        if let Some(target) = simulate_until {
            self.store.node_in(workflow_id, target).await?;
        }

        let immediately = self.can_immediately_be_tested(&trigger)?;
        let start_now = match simulate_until {
            None => immediately,
            // Re-capturing the trigger's own sample data needs a real event.
            Some(target) => {
                immediately || (trigger.service.sample_data.is_some() && trigger.id != target)
            }
        };

        self.set_temporary_states(workflow_id, simulate_until).await?;
        if !start_now {
            return Ok(TestRunToggle::Armed);
        }

        self.scheduler
            .schedule_run(RunRequest {
                workflow_id,
                payload: None,
                simulate_until,
            })
            .await?;
        Ok(TestRunToggle::Started)
    }

    fn can_immediately_be_tested(&self, trigger: &Node) -> Result<bool, EngineError> {
        let node_type = self
            .registry
            .get(&trigger.node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(trigger.node_type.clone()))?;
        Ok(node_type.immediate_dispatch()
            || node_type.service().can_immediately_be_tested(&trigger.service))
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Schedule every workflow whose trigger is of `trigger_type` and which
    /// currently accepts events. Returns the scheduled workflow ids.
    ///
    /// A consumed test or simulate arm is cleared, and the payload becomes
    /// the trigger's sample data.
    #[instrument(skip(self, payload))]
    pub async fn on_event(&self, trigger_type: &str, payload: Value) -> Result<Vec<WorkflowId>, EngineError> {
        let now = Utc::now();
        let mut scheduled = Vec::new();

        for mut trigger in self.store.triggers_of_type(trigger_type).await? {
            let mut workflow = self.store.get_workflow(trigger.workflow_id).await?;
            if workflow.trashed || !workflow.accepts_events(now) {
                continue;
            }

            self.scheduler
                .schedule_run(RunRequest {
                    workflow_id: workflow.id,
                    payload: Some(payload.clone()),
                    simulate_until: workflow.simulate_until_node,
                })
                .await?;
            scheduled.push(workflow.id);

            let mut consumed = false;
            if workflow.allow_test_run_until.is_some() {
                workflow.allow_test_run_until = None;
                consumed = true;
            }
            if workflow.simulate_until_node.is_some() && !workflow.is_published_copy() {
                workflow.simulate_until_node = None;
                consumed = true;
            }
            if !consumed {
                continue;
            }

            self.store.save_workflow(&workflow).await?;
            self.events.emit(GraphEvent::WorkflowUpdated { workflow });

            trigger.service.sample_data = Some(DispatchResult::new(payload.clone()));
            let mut changes = NodeChanges::new();
            changes.upsert(trigger);
            self.store.apply(changes).await?;
        }

        info!(count = scheduled.len(), "event scheduled runs");
        Ok(scheduled)
    }

    /// Run history of a workflow, newest first.
    pub async fn history_of(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunHistoryEntry>, EngineError> {
        self.store.recent_history(workflow_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, RecordingScheduler};
    use serde_json::json;

    fn controller(fx: &Fixture, scheduler: Arc<RecordingScheduler>, config: RunControlConfig) -> RunController {
        RunController::new(fx.store.clone(), fx.mutator.registry().clone(), scheduler, config)
    }

    #[tokio::test]
    async fn successful_run_is_recorded() {
        let fx = Fixture::new().await;
        let a = fx.append("A").await;
        let rc = controller(&fx, RecordingScheduler::new(), RunControlConfig::default());

        let report = rc.start_workflow(fx.workflow.id, Some(json!({ "row": 1 })), None).await.unwrap();
        assert_eq!(report.status, HistoryStatus::Success);
        assert!(report.dispatch.unwrap().dispatched().contains(&a.id));

        let history = rc.history_of(fx.workflow.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HistoryStatus::Success);
        assert!(history[0].is_test_run);
        assert!(history[0].completed_on.is_some());
    }

    #[tokio::test]
    async fn dispatch_failure_closes_history_as_error() {
        let fx = Fixture::new().await;
        let rc = controller(&fx, RecordingScheduler::new(), RunControlConfig::default());

        // An event trigger without payload cannot be dispatched.
        let report = rc.start_workflow(fx.workflow.id, None, None).await.unwrap();
        assert_eq!(report.status, HistoryStatus::Error);

        let history = rc.history_of(fx.workflow.id, 10).await.unwrap();
        assert_eq!(history[0].status, HistoryStatus::Error);
        assert!(!history[0].message.is_empty());
    }

    #[tokio::test]
    async fn breaker_disables_draft_and_published_copy() {
        let fx = Fixture::new().await;
        let config = RunControlConfig { max_consecutive_errors: 2, ..RunControlConfig::default() };
        let rc = controller(&fx, RecordingScheduler::new(), config);

        let mut copy = Workflow::new(fx.workflow.automation_id, "Flow", 1);
        copy.published_from = Some(fx.workflow.id);
        copy.state = WorkflowState::Live;
        fx.store.insert_workflow(&copy).await.unwrap();

        for _ in 0..2 {
            rc.start_workflow(fx.workflow.id, None, None).await.unwrap();
        }
        let report = rc.start_workflow(copy.id, Some(json!({})), None).await.unwrap();
        assert_eq!(report.status, HistoryStatus::Disabled);

        assert_eq!(fx.workflow().await.state, WorkflowState::Disabled);
        assert_eq!(fx.store.get_workflow(copy.id).await.unwrap().state, WorkflowState::Disabled);
        let history = rc.history_of(fx.workflow.id, 1).await.unwrap();
        assert_eq!(history[0].status, HistoryStatus::Disabled);
        assert!(!history[0].is_test_run);
    }

    #[tokio::test]
    async fn toggle_arms_then_cancels() {
        let fx = Fixture::new().await;
        let scheduler = RecordingScheduler::new();
        let rc = controller(&fx, scheduler.clone(), RunControlConfig::default());

        let toggled = rc.toggle_test_run(&fx.actor, fx.workflow.id, None).await.unwrap();
        assert_eq!(toggled, TestRunToggle::Armed);
        assert!(fx.workflow().await.test_run_armed(Utc::now()));
        assert!(scheduler.requests().is_empty());

        let toggled = rc.toggle_test_run(&fx.actor, fx.workflow.id, None).await.unwrap();
        assert_eq!(toggled, TestRunToggle::Cancelled);
        assert!(fx.workflow().await.allow_test_run_until.is_none());
    }

    #[tokio::test]
    async fn simulation_with_trigger_sample_starts_immediately() {
        let fx = Fixture::new().await;
        let a = fx.append("A").await;
        let scheduler = RecordingScheduler::new();
        let rc = controller(&fx, scheduler.clone(), RunControlConfig::default());

        // Without sample data the trigger has to wait for an event.
        let toggled = rc.toggle_test_run(&fx.actor, fx.workflow.id, Some(a.id)).await.unwrap();
        assert_eq!(toggled, TestRunToggle::Armed);
        rc.toggle_test_run(&fx.actor, fx.workflow.id, Some(a.id)).await.unwrap();

        let mut trigger = fx.node(fx.trigger.id).await;
        trigger.service.sample_data = Some(DispatchResult::new(json!({ "row": 1 })));
        let mut changes = NodeChanges::new();
        changes.upsert(trigger);
        fx.store.apply(changes).await.unwrap();

        let toggled = rc.toggle_test_run(&fx.actor, fx.workflow.id, Some(a.id)).await.unwrap();
        assert_eq!(toggled, TestRunToggle::Started);
        assert_eq!(scheduler.requests()[0].simulate_until, Some(a.id));

        // Simulating the trigger itself always waits.
        rc.toggle_test_run(&fx.actor, fx.workflow.id, None).await.unwrap();
        let toggled = rc
            .toggle_test_run(&fx.actor, fx.workflow.id, Some(fx.trigger.id))
            .await
            .unwrap();
        assert_eq!(toggled, TestRunToggle::Armed);
    }

    #[tokio::test]
    async fn events_run_armed_drafts_once() {
        let fx = Fixture::new().await;
        let scheduler = RecordingScheduler::new();
        let rc = controller(&fx, scheduler.clone(), RunControlConfig::default());

        assert!(rc.on_event("rows_created", json!([{ "id": 1 }])).await.unwrap().is_empty());

        rc.set_temporary_states(fx.workflow.id, None).await.unwrap();
        let scheduled = rc.on_event("rows_created", json!([{ "id": 2 }])).await.unwrap();
        assert_eq!(scheduled, vec![fx.workflow.id]);
        assert_eq!(scheduler.requests()[0].payload, Some(json!([{ "id": 2 }])));

        assert!(fx.workflow().await.allow_test_run_until.is_none());
        let trigger = fx.node(fx.trigger.id).await;
        assert_eq!(trigger.service.sample_data.unwrap().data, json!([{ "id": 2 }]));

        assert!(rc.on_event("rows_created", json!([])).await.unwrap().is_empty());
        assert!(rc.on_event("rows_updated", json!([])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_actor_cannot_toggle() {
        let fx = Fixture::new().await;
        let rc = controller(&fx, RecordingScheduler::new(), RunControlConfig::default())
            .with_permissions(Arc::new(crate::permissions::DenyAll));
        let err = rc.toggle_test_run(&fx.actor, fx.workflow.id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
    }
}
