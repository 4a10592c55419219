//! [`GraphStore`] backed by the `db` crate's SQLite repositories.
//!
//! Rows carry ids and timestamps as strings; this module owns the
//! conversion to and from domain types.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use db::models::{HistoryRow, NodeRow, WorkflowRow};
use db::repository::{history, nodes, workflows};
use db::{DbError, DbPool};

use super::{GraphStore, NodeChanges};
use crate::models::{AutomationId, Node, NodeId, RunHistoryEntry, Workflow, WorkflowId};
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct SqlGraphStore {
    pool: DbPool,
}

impl SqlGraphStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn timestamp(at: &DateTime<Utc>) -> String {
    // Fixed precision keeps lexical and chronological order identical.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidRow(format!("timestamp '{raw}': {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(raw).map_err(|e| EngineError::InvalidRow(format!("id '{raw}': {e}")))
}

fn parse_opt_id(raw: Option<&str>) -> Result<Option<Uuid>, EngineError> {
    raw.map(parse_id).transpose()
}

fn node_to_row(node: &Node) -> Result<NodeRow, EngineError> {
    Ok(NodeRow {
        id: node.id.to_string(),
        workflow_id: node.workflow_id.to_string(),
        parent_node_id: node.parent_node_id.map(|id| id.to_string()),
        node_type: node.node_type.clone(),
        label: node.label.clone(),
        previous_node_id: node.previous_node_id.map(|id| id.to_string()),
        previous_node_output: node.previous_node_output.clone(),
        order: node.order,
        service: serde_json::to_string(&node.service)?,
        trashed: node.trashed,
        created_at: timestamp(&node.created_at),
    })
}

fn row_to_node(row: NodeRow) -> Result<Node, EngineError> {
    Ok(Node {
        id: parse_id(&row.id)?,
        workflow_id: parse_id(&row.workflow_id)?,
        parent_node_id: parse_opt_id(row.parent_node_id.as_deref())?,
        node_type: row.node_type,
        label: row.label,
        previous_node_id: parse_opt_id(row.previous_node_id.as_deref())?,
        previous_node_output: row.previous_node_output,
        order: row.order,
        service: serde_json::from_str(&row.service)?,
        trashed: row.trashed,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn workflow_to_row(workflow: &Workflow) -> WorkflowRow {
    WorkflowRow {
        id: workflow.id.to_string(),
        automation_id: workflow.automation_id.to_string(),
        name: workflow.name.clone(),
        order: workflow.order,
        state: workflow.state.as_str().to_owned(),
        allow_test_run_until: workflow.allow_test_run_until.as_ref().map(timestamp),
        simulate_until_node_id: workflow.simulate_until_node.map(|id| id.to_string()),
        published_from_id: workflow.published_from.map(|id| id.to_string()),
        trashed: workflow.trashed,
        created_at: timestamp(&workflow.created_at),
    }
}

fn row_to_workflow(row: WorkflowRow) -> Result<Workflow, EngineError> {
    Ok(Workflow {
        id: parse_id(&row.id)?,
        automation_id: parse_id(&row.automation_id)?,
        name: row.name,
        order: row.order,
        state: row.state.parse().map_err(EngineError::InvalidRow)?,
        allow_test_run_until: row
            .allow_test_run_until
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        simulate_until_node: parse_opt_id(row.simulate_until_node_id.as_deref())?,
        published_from: parse_opt_id(row.published_from_id.as_deref())?,
        trashed: row.trashed,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn history_to_row(entry: &RunHistoryEntry) -> HistoryRow {
    HistoryRow {
        id: entry.id.to_string(),
        workflow_id: entry.workflow_id.to_string(),
        started_on: timestamp(&entry.started_on),
        completed_on: entry.completed_on.as_ref().map(timestamp),
        status: entry.status.as_str().to_owned(),
        message: entry.message.clone(),
        is_test_run: entry.is_test_run,
    }
}

fn row_to_history(row: HistoryRow) -> Result<RunHistoryEntry, EngineError> {
    Ok(RunHistoryEntry {
        id: parse_id(&row.id)?,
        workflow_id: parse_id(&row.workflow_id)?,
        started_on: parse_timestamp(&row.started_on)?,
        completed_on: row.completed_on.as_deref().map(parse_timestamp).transpose()?,
        status: row.status.parse().map_err(EngineError::InvalidRow)?,
        message: row.message,
        is_test_run: row.is_test_run,
    })
}

fn collect<R, T>(rows: Vec<R>, convert: fn(R) -> Result<T, EngineError>) -> Result<Vec<T>, EngineError> {
    rows.into_iter().map(convert).collect()
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

#[async_trait]
impl GraphStore for SqlGraphStore {
    async fn get_node(&self, id: NodeId) -> Result<Node, EngineError> {
        match nodes::get_node(&self.pool, &id.to_string()).await {
            Ok(row) => row_to_node(row),
            Err(DbError::NotFound { .. }) => Err(EngineError::NodeNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn nodes_of(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, EngineError> {
        let rows = nodes::list_nodes(&self.pool, &workflow_id.to_string()).await?;
        collect(rows, row_to_node)
    }

    async fn successors_of(
        &self,
        workflow_id: WorkflowId,
        previous: Option<NodeId>,
        output: Option<&str>,
    ) -> Result<Vec<Node>, EngineError> {
        let previous = previous.map(|id| id.to_string());
        let rows = nodes::list_successors(
            &self.pool,
            &workflow_id.to_string(),
            previous.as_deref(),
            output,
        )
        .await?;
        collect(rows, row_to_node)
    }

    async fn triggers_of_type(&self, node_type: &str) -> Result<Vec<Node>, EngineError> {
        let rows = nodes::list_entry_nodes_of_type(&self.pool, node_type).await?;
        collect(rows, row_to_node)
    }

    async fn apply(&self, changes: NodeChanges) -> Result<(), EngineError> {
        let upserts = changes
            .upserts
            .iter()
            .map(node_to_row)
            .collect::<Result<Vec<_>, _>>()?;
        let deletes: Vec<String> = changes.deletes.iter().map(Uuid::to_string).collect();
        nodes::apply_changes(&self.pool, &upserts, &deletes).await?;
        Ok(())
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        workflows::insert_workflow(&self.pool, &workflow_to_row(workflow)).await?;
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, EngineError> {
        match workflows::get_workflow(&self.pool, &id.to_string()).await {
            Ok(row) => row_to_workflow(row),
            Err(DbError::NotFound { .. }) => Err(EngineError::WorkflowNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn workflows_of(
        &self,
        automation_id: AutomationId,
        include_trashed: bool,
    ) -> Result<Vec<Workflow>, EngineError> {
        let rows =
            workflows::list_workflows(&self.pool, &automation_id.to_string(), include_trashed)
                .await?;
        collect(rows, row_to_workflow)
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        match workflows::update_workflow(&self.pool, &workflow_to_row(workflow)).await {
            Ok(()) => Ok(()),
            Err(DbError::NotFound { .. }) => Err(EngineError::WorkflowNotFound(workflow.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn published_copies_of(&self, source: WorkflowId) -> Result<Vec<Workflow>, EngineError> {
        let rows = workflows::list_published_from(&self.pool, &source.to_string()).await?;
        collect(rows, row_to_workflow)
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Result<(), EngineError> {
        match workflows::delete_workflow(&self.pool, &id.to_string()).await {
            Ok(()) => Ok(()),
            Err(DbError::NotFound { .. }) => Err(EngineError::WorkflowNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_history(&self, entry: &RunHistoryEntry) -> Result<(), EngineError> {
        history::insert_history(&self.pool, &history_to_row(entry)).await?;
        Ok(())
    }

    async fn save_history(&self, entry: &RunHistoryEntry) -> Result<(), EngineError> {
        history::update_history(&self.pool, &history_to_row(entry)).await?;
        Ok(())
    }

    async fn recent_history(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<RunHistoryEntry>, EngineError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = history::recent_history(&self.pool, &workflow_id.to_string(), limit).await?;
        collect(rows, row_to_history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryStatus, WorkflowState};
    use ::nodes::{DispatchResult, ServiceDescriptor};
    use serde_json::json;

    async fn store() -> SqlGraphStore {
        SqlGraphStore::new(db::pool::memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn workflows_and_nodes_round_trip() {
        let store = store().await;
        let mut workflow = Workflow::new(Uuid::new_v4(), "Flow", 1);
        workflow.state = WorkflowState::Live;
        workflow.allow_test_run_until = Some(Utc::now());
        store.insert_workflow(&workflow).await.unwrap();

        let mut service = ServiceDescriptor::new(json!({ "url": "https://example.com" }));
        service.sample_data = Some(DispatchResult::new(json!({ "ok": true })));
        let trigger = Node {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            parent_node_id: None,
            node_type: "rows_created".into(),
            label: "When".into(),
            previous_node_id: None,
            previous_node_output: String::new(),
            order: 1.0,
            service,
            trashed: false,
            created_at: Utc::now(),
        };
        let mut changes = NodeChanges::new();
        changes.upsert(trigger.clone());
        store.apply(changes).await.unwrap();

        let fetched = store.get_node(trigger.id).await.unwrap();
        assert_eq!(fetched.service, trigger.service);
        assert_eq!(fetched.previous_node_id, None);
        assert_eq!(store.trigger_of(workflow.id).await.unwrap().map(|n| n.id), Some(trigger.id));

        let loaded = store.get_workflow(workflow.id).await.unwrap();
        assert_eq!(loaded.state, WorkflowState::Live);
        assert_eq!(loaded.name, "Flow");
    }

    #[tokio::test]
    async fn missing_rows_map_to_domain_errors() {
        let store = store().await;
        let id = Uuid::new_v4();
        assert!(matches!(store.get_node(id).await, Err(EngineError::NodeNotFound(x)) if x == id));
        assert!(matches!(
            store.get_workflow(id).await,
            Err(EngineError::WorkflowNotFound(x)) if x == id
        ));
    }

    #[tokio::test]
    async fn history_round_trips() {
        let store = store().await;
        let workflow = Workflow::new(Uuid::new_v4(), "Flow", 1);
        store.insert_workflow(&workflow).await.unwrap();

        let mut entry = RunHistoryEntry::started(workflow.id, true);
        store.insert_history(&entry).await.unwrap();
        entry.close(HistoryStatus::Success, "");
        store.save_history(&entry).await.unwrap();

        let recent = store.recent_history(workflow.id, 5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, HistoryStatus::Success);
        assert!(recent[0].is_test_run);
    }
}
