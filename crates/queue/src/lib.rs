//! `queue` crate: asynchronous run hand-off.
//!
//! [`RunQueue`] is the producer side: the run controller schedules runs
//! through it (it implements [`engine::RunScheduler`]) and returns at once.
//! [`RunWorker`] is the consumer side: it receives requests from the channel
//! and starts each run through the [`engine::RunController`], one at a time.

pub mod error;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use engine::{EngineError, RunController, RunRequest, RunScheduler};

pub use error::QueueError;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// Sender half of the run channel.
#[derive(Debug, Clone)]
pub struct RunQueue {
    sender: mpsc::Sender<RunRequest>,
}

impl RunQueue {
    /// A queue and the receiver a [`RunWorker`] consumes.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RunRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    pub async fn enqueue(&self, request: RunRequest) -> Result<(), QueueError> {
        self.sender.send(request).await.map_err(|_| QueueError::Closed)
    }
}

#[async_trait]
impl RunScheduler for RunQueue {
    async fn schedule_run(&self, request: RunRequest) -> Result<(), EngineError> {
        self.enqueue(request).await?;
        Ok(())
    }
}

/// Asks a [`RunWorker`] to finish what is queued and stop.
#[derive(Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
    }
}

pub struct RunWorker {
    receiver: mpsc::Receiver<RunRequest>,
    controller: Arc<RunController>,
    shutdown: watch::Receiver<bool>,
}

impl RunWorker {
    pub fn new(receiver: mpsc::Receiver<RunRequest>, controller: Arc<RunController>) -> (Self, Shutdown) {
        let (sender, shutdown) = watch::channel(false);
        (
            Self {
                receiver,
                controller,
                shutdown,
            },
            Shutdown { sender },
        )
    }

    /// Run requests until shutdown (draining what is already queued) or
    /// until every sender is dropped. Returns how many runs were started.
    pub async fn run(mut self) -> usize {
        info!("run worker started");
        let mut processed = 0;

        loop {
            tokio::select! {
                request = self.receiver.recv() => match request {
                    Some(request) => {
                        self.handle(request).await;
                        processed += 1;
                    }
                    None => break,
                },
                _ = self.shutdown.changed() => {
                    while let Ok(request) = self.receiver.try_recv() {
                        self.handle(request).await;
                        processed += 1;
                    }
                    break;
                }
            }
        }

        info!(processed, "run worker stopped");
        processed
    }

    async fn handle(&self, request: RunRequest) {
        let workflow_id = request.workflow_id;
        match self
            .controller
            .start_workflow(workflow_id, request.payload, request.simulate_until)
            .await
        {
            Ok(report) => {
                info!(workflow_id = %workflow_id, status = %report.status, "run finished");
            }
            Err(e) => {
                error!(workflow_id = %workflow_id, error = %e, "run could not be recorded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::models::NewNode;
    use engine::workflows::{WorkflowHandler, WorkflowUpdate};
    use engine::{
        Actor, GraphMutator, GraphStore, HistoryStatus, MemoryGraphStore, RunControlConfig,
        WorkflowState,
    };
    use nodes::mock::MockService;
    use nodes::NodeTypeRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn closed_queue_reports_an_error() {
        let (queue, receiver) = RunQueue::new(1);
        drop(receiver);

        let request = RunRequest {
            workflow_id: Default::default(),
            payload: None,
            simulate_until: None,
        };
        assert_eq!(queue.enqueue(request.clone()).await, Err(QueueError::Closed));
        assert!(matches!(
            queue.schedule_run(request).await,
            Err(EngineError::Scheduling(_))
        ));
    }

    #[tokio::test]
    async fn events_are_run_by_the_worker() {
        let mut registry = NodeTypeRegistry::with_builtins();
        let action = Arc::new(MockService::returning(json!({ "ok": true })));
        registry.register_action("http_request", action.clone());
        let registry = Arc::new(registry);
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        let actor = Actor::new("tester");

        let handler = WorkflowHandler::new(store.clone(), registry.clone());
        let (workflow, _) = handler
            .create_workflow(&actor, Default::default(), "Flow", Some("rows_created"))
            .await
            .unwrap();
        GraphMutator::new(store.clone(), registry.clone())
            .create_node(&actor, "http_request", workflow.id, None, NewNode::default())
            .await
            .unwrap();
        handler
            .update_workflow(&actor, workflow.id, WorkflowUpdate { name: None, state: Some(WorkflowState::Live) })
            .await
            .unwrap();

        let (queue, receiver) = RunQueue::new(DEFAULT_CAPACITY);
        let controller = Arc::new(RunController::new(
            store.clone(),
            registry,
            Arc::new(queue),
            RunControlConfig::default(),
        ));
        let (worker, shutdown) = RunWorker::new(receiver, controller.clone());
        let worker = tokio::spawn(worker.run());

        let scheduled = controller.on_event("rows_created", json!([{ "id": 1 }])).await.unwrap();
        assert_eq!(scheduled, vec![workflow.id]);

        shutdown.trigger();
        assert_eq!(worker.await.unwrap(), 1);

        let history = controller.history_of(workflow.id, 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, HistoryStatus::Success);
        assert_eq!(action.call_count(), 1);
    }
}
