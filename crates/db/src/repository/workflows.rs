//! Workflow CRUD operations.

use crate::{models::WorkflowRow, DbError, DbPool};

const COLUMNS: &str = r#"id, automation_id, name, "order", state, allow_test_run_until,
    simulate_until_node_id, published_from_id, trashed, created_at"#;

/// Insert a new workflow row.
pub async fn insert_workflow(pool: &DbPool, row: &WorkflowRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflows (id, automation_id, name, "order", state, allow_test_run_until,
                               simulate_until_node_id, published_from_id, trashed, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id)
    .bind(&row.automation_id)
    .bind(&row.name)
    .bind(row.order)
    .bind(&row.state)
    .bind(&row.allow_test_run_until)
    .bind(&row.simulate_until_node_id)
    .bind(&row.published_from_id)
    .bind(row.trashed)
    .bind(&row.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single workflow by its primary key, trashed or not.
pub async fn get_workflow(pool: &DbPool, id: &str) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::not_found("workflows", id))?;

    Ok(row)
}

/// Return the workflows of an automation in display order.
///
/// Published copies are never listed; they are reached through
/// [`list_published_from`].
pub async fn list_workflows(
    pool: &DbPool,
    automation_id: &str,
    include_trashed: bool,
) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"SELECT {COLUMNS} FROM workflows
           WHERE automation_id = ? AND published_from_id IS NULL AND (? OR trashed = 0)
           ORDER BY "order", id"#
    ))
    .bind(automation_id)
    .bind(include_trashed)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Published copies of `source_id`, oldest first.
pub async fn list_published_from(
    pool: &DbPool,
    source_id: &str,
) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE published_from_id = ? ORDER BY created_at, rowid"
    ))
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Overwrite every mutable column of an existing workflow.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn update_workflow(pool: &DbPool, row: &WorkflowRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflows
        SET name = ?, "order" = ?, state = ?, allow_test_run_until = ?,
            simulate_until_node_id = ?, published_from_id = ?, trashed = ?
        WHERE id = ?
        "#,
    )
    .bind(&row.name)
    .bind(row.order)
    .bind(&row.state)
    .bind(&row.allow_test_run_until)
    .bind(&row.simulate_until_node_id)
    .bind(&row.published_from_id)
    .bind(row.trashed)
    .bind(&row.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("workflows", &row.id));
    }

    Ok(())
}

/// Permanently delete a workflow; its nodes and history cascade.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &DbPool, id: &str) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("workflows", id));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::memory_pool;
    use crate::repository::fixtures;

    #[tokio::test]
    async fn insert_update_and_list() {
        let pool = memory_pool().await.unwrap();
        let mut row = fixtures::workflow("w1", "a1", "Flow");
        insert_workflow(&pool, &row).await.unwrap();

        row.state = "live".to_owned();
        row.order = 3;
        update_workflow(&pool, &row).await.unwrap();

        let fetched = get_workflow(&pool, "w1").await.unwrap();
        assert_eq!(fetched, row);
        assert_eq!(list_workflows(&pool, "a1", false).await.unwrap().len(), 1);
        assert!(list_workflows(&pool, "other", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn published_copies_are_listed_separately() {
        let pool = memory_pool().await.unwrap();
        insert_workflow(&pool, &fixtures::workflow("w1", "a1", "Flow")).await.unwrap();

        let mut copy = fixtures::workflow("w2", "a1", "Flow");
        copy.published_from_id = Some("w1".to_owned());
        insert_workflow(&pool, &copy).await.unwrap();

        let listed = list_workflows(&pool, "a1", true).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "w1");

        let published = list_published_from(&pool, "w1").await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, "w2");
    }

    #[tokio::test]
    async fn trashed_rows_are_hidden_unless_requested() {
        let pool = memory_pool().await.unwrap();
        let mut row = fixtures::workflow("w1", "a1", "Flow");
        row.trashed = true;
        insert_workflow(&pool, &row).await.unwrap();

        assert!(list_workflows(&pool, "a1", false).await.unwrap().is_empty());
        assert_eq!(list_workflows(&pool, "a1", true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_rows_report_not_found() {
        let pool = memory_pool().await.unwrap();
        assert!(matches!(get_workflow(&pool, "nope").await, Err(DbError::NotFound { .. })));
        assert!(matches!(delete_workflow(&pool, "nope").await, Err(DbError::NotFound { .. })));
    }
}
