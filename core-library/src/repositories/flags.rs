//! Flag columns of the `items` table.
//!
//! These functions take a connection rather than a pool so that a flag write
//! and the matching pending-mutation write share one transaction.

use crate::error::Result;
use crate::models::{FlagState, MutationKind, StoredItem, StoredItemRow, SubjectFlags};
use sqlx::SqliteConnection;

/// Flags of `subject_id`, or `None` when the subject has never been stored.
pub async fn read_flags(conn: &mut SqliteConnection, subject_id: &str) -> Result<Option<SubjectFlags>> {
    let row = sqlx::query_as::<_, StoredItemRow>("SELECT * FROM items WHERE id = ?")
        .bind(subject_id)
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|r| StoredItem::from(r).flags))
}

/// Write one flag, creating a placeholder item row when needed.
pub async fn write_flag(
    conn: &mut SqliteConnection,
    subject_id: &str,
    kind: MutationKind,
    state: FlagState,
    updated_at: i64,
) -> Result<()> {
    let (value_col, prior_col) = kind.columns();
    let (value, prior) = state.to_columns();

    let sql = format!(
        r#"
        INSERT INTO items (id, updated_at, {value_col}, {prior_col})
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            {value_col} = excluded.{value_col},
            {prior_col} = excluded.{prior_col},
            updated_at = excluded.updated_at
        "#
    );

    sqlx::query(&sql)
        .bind(subject_id)
        .bind(updated_at)
        .bind(value)
        .bind(prior)
        .execute(conn)
        .await?;

    Ok(())
}
