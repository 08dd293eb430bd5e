//! Rows of the `pending_mutations` table.

use crate::error::Result;
use crate::models::{MutationKind, PendingMutation, PendingMutationRow};
use sqlx::SqliteConnection;

/// Insert or replace the row for `(subject_id, kind)`.
///
/// Replacing re-inserts the row, so it moves to the back of the drain order.
pub async fn upsert_pending(conn: &mut SqliteConnection, mutation: &PendingMutation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO pending_mutations (subject_id, kind, desired_value, enqueued_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&mutation.subject_id)
    .bind(mutation.kind.as_str())
    .bind(mutation.desired_value)
    .bind(mutation.enqueued_at)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn find_pending(
    conn: &mut SqliteConnection,
    subject_id: &str,
    kind: MutationKind,
) -> Result<Option<PendingMutation>> {
    let row = sqlx::query_as::<_, PendingMutationRow>(
        "SELECT * FROM pending_mutations WHERE subject_id = ? AND kind = ?",
    )
    .bind(subject_id)
    .bind(kind.as_str())
    .fetch_optional(conn)
    .await?;

    row.map(PendingMutation::try_from).transpose()
}

/// Returns `true` when a row was removed.
pub async fn delete_pending(
    conn: &mut SqliteConnection,
    subject_id: &str,
    kind: MutationKind,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM pending_mutations WHERE subject_id = ? AND kind = ?")
        .bind(subject_id)
        .bind(kind.as_str())
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// All pending rows, oldest first.
pub async fn list_pending(conn: &mut SqliteConnection) -> Result<Vec<PendingMutation>> {
    let rows = sqlx::query_as::<_, PendingMutationRow>(
        "SELECT * FROM pending_mutations ORDER BY enqueued_at ASC, rowid ASC",
    )
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(PendingMutation::try_from).collect()
}

pub async fn count_pending(conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_mutations")
        .fetch_one(conn)
        .await?;
    Ok(count)
}
