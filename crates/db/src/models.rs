//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` crate. Ids are stored as UUID strings
//! and timestamps as RFC 3339 strings, so rows round-trip through SQLite
//! without driver-specific type mapping.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow row (draft or published copy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: String,
    pub automation_id: String,
    pub name: String,
    pub order: i64,
    /// `draft`, `live`, `paused` or `disabled`.
    pub state: String,
    pub allow_test_run_until: Option<String>,
    pub simulate_until_node_id: Option<String>,
    /// Set on published copies only.
    pub published_from_id: Option<String>,
    pub trashed: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// nodes
// ---------------------------------------------------------------------------

/// A persisted node row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    pub id: String,
    pub workflow_id: String,
    pub parent_node_id: Option<String>,
    pub node_type: String,
    pub label: String,
    pub previous_node_id: Option<String>,
    pub previous_node_output: String,
    pub order: f64,
    /// JSON-encoded service descriptor (settings + sample data).
    pub service: String,
    pub trashed: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// workflow_history
// ---------------------------------------------------------------------------

/// A persisted run history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HistoryRow {
    pub id: String,
    pub workflow_id: String,
    pub started_on: String,
    pub completed_on: Option<String>,
    /// `started`, `success`, `error` or `disabled`.
    pub status: String,
    pub message: String,
    pub is_test_run: bool,
}
