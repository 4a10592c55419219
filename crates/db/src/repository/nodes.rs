//! Node persistence.
//!
//! Successors are never stored; they are the inverse of the
//! `(previous_node_id, previous_node_output)` back-pointer and are answered
//! by [`list_successors`].

use crate::{models::NodeRow, DbError, DbPool};

const COLUMNS: &str = r#"id, workflow_id, parent_node_id, node_type, label, previous_node_id,
    previous_node_output, "order", service, trashed, created_at"#;

/// Fetch a single node by its primary key, trashed or not.
pub async fn get_node(pool: &DbPool, id: &str) -> Result<NodeRow, DbError> {
    let row = sqlx::query_as::<_, NodeRow>(&format!("SELECT {COLUMNS} FROM nodes WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found("nodes", id))?;

    Ok(row)
}

/// All live nodes of a workflow, by display order.
pub async fn list_nodes(pool: &DbPool, workflow_id: &str) -> Result<Vec<NodeRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeRow>(&format!(
        r#"SELECT {COLUMNS} FROM nodes
           WHERE workflow_id = ? AND trashed = 0
           ORDER BY "order", id"#
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Live entry-point nodes of `node_type` across every workflow.
pub async fn list_entry_nodes_of_type(pool: &DbPool, node_type: &str) -> Result<Vec<NodeRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeRow>(&format!(
        r#"SELECT {COLUMNS} FROM nodes
           WHERE node_type = ? AND previous_node_id IS NULL AND parent_node_id IS NULL
             AND trashed = 0
           ORDER BY created_at, id"#
    ))
    .bind(node_type)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Live nodes whose back-pointer is `previous_node_id` (NULL matches the
/// workflow's first nodes). `output` restricts the branch; `None` returns
/// every branch.
pub async fn list_successors(
    pool: &DbPool,
    workflow_id: &str,
    previous_node_id: Option<&str>,
    output: Option<&str>,
) -> Result<Vec<NodeRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeRow>(&format!(
        r#"SELECT {COLUMNS} FROM nodes
           WHERE workflow_id = ? AND previous_node_id IS ? AND trashed = 0
             AND (? IS NULL OR previous_node_output = ?)
           ORDER BY "order", id"#
    ))
    .bind(workflow_id)
    .bind(previous_node_id)
    .bind(output)
    .bind(output)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert or overwrite `upserts` and hard-delete `deletes` in one
/// transaction. Either every row lands or none does.
pub async fn apply_changes(
    pool: &DbPool,
    upserts: &[NodeRow],
    deletes: &[String],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    for row in upserts {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, workflow_id, parent_node_id, node_type, label, previous_node_id,
                               previous_node_output, "order", service, trashed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                parent_node_id = excluded.parent_node_id,
                node_type = excluded.node_type,
                label = excluded.label,
                previous_node_id = excluded.previous_node_id,
                previous_node_output = excluded.previous_node_output,
                "order" = excluded."order",
                service = excluded.service,
                trashed = excluded.trashed
            "#,
        )
        .bind(&row.id)
        .bind(&row.workflow_id)
        .bind(&row.parent_node_id)
        .bind(&row.node_type)
        .bind(&row.label)
        .bind(&row.previous_node_id)
        .bind(&row.previous_node_output)
        .bind(row.order)
        .bind(&row.service)
        .bind(row.trashed)
        .bind(&row.created_at)
        .execute(&mut *tx)
        .await?;
    }

    for id in deletes {
        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::memory_pool;
    use crate::repository::{fixtures, workflows};

    async fn seeded() -> DbPool {
        let pool = memory_pool().await.unwrap();
        workflows::insert_workflow(&pool, &fixtures::workflow("w1", "a1", "Flow"))
            .await
            .unwrap();
        let rows = vec![
            fixtures::node("t", "w1", None, ""),
            fixtures::node("a", "w1", Some("t"), ""),
            fixtures::node("b", "w1", Some("a"), "yes"),
            fixtures::node("c", "w1", Some("a"), ""),
        ];
        apply_changes(&pool, &rows, &[]).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn successors_follow_back_pointers() {
        let pool = seeded().await;

        let first = list_successors(&pool, "w1", None, None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "t");

        let all = list_successors(&pool, "w1", Some("a"), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let branch = list_successors(&pool, "w1", Some("a"), Some("yes")).await.unwrap();
        assert_eq!(branch.len(), 1);
        assert_eq!(branch[0].id, "b");
    }

    #[tokio::test]
    async fn upsert_overwrites_and_trashed_nodes_disappear() {
        let pool = seeded().await;

        let mut b = get_node(&pool, "b").await.unwrap();
        b.previous_node_output = String::new();
        b.trashed = true;
        apply_changes(&pool, &[b], &["c".to_owned()]).await.unwrap();

        assert_eq!(list_nodes(&pool, "w1").await.unwrap().len(), 2);
        assert!(get_node(&pool, "b").await.unwrap().trashed);
        assert!(matches!(get_node(&pool, "c").await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn entry_nodes_are_found_by_type() {
        let pool = seeded().await;
        let mut trigger = get_node(&pool, "t").await.unwrap();
        trigger.node_type = "rows_created".to_owned();
        apply_changes(&pool, &[trigger], &[]).await.unwrap();

        let found = list_entry_nodes_of_type(&pool, "rows_created").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t");
        assert!(list_entry_nodes_of_type(&pool, "http_request").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_the_workflow_cascades() {
        let pool = seeded().await;
        workflows::delete_workflow(&pool, "w1").await.unwrap();
        assert!(list_nodes(&pool, "w1").await.unwrap().is_empty());
    }
}
