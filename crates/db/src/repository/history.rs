//! Run history. Entries are appended when a run starts and closed once.

use crate::{models::HistoryRow, DbError, DbPool};

pub async fn insert_history(pool: &DbPool, row: &HistoryRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_history (id, workflow_id, started_on, completed_on, status, message, is_test_run)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id)
    .bind(&row.workflow_id)
    .bind(&row.started_on)
    .bind(&row.completed_on)
    .bind(&row.status)
    .bind(&row.message)
    .bind(row.is_test_run)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the outcome of a run.
pub async fn update_history(pool: &DbPool, row: &HistoryRow) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE workflow_history SET completed_on = ?, status = ?, message = ? WHERE id = ?",
    )
    .bind(&row.completed_on)
    .bind(&row.status)
    .bind(&row.message)
    .bind(&row.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("workflow_history", &row.id));
    }

    Ok(())
}

/// The `limit` most recent entries of a workflow, newest first.
pub async fn recent_history(
    pool: &DbPool,
    workflow_id: &str,
    limit: i64,
) -> Result<Vec<HistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT id, workflow_id, started_on, completed_on, status, message, is_test_run
        FROM workflow_history
        WHERE workflow_id = ?
        ORDER BY started_on DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(workflow_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
