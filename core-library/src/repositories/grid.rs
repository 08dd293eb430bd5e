//! Grid projection repository
//!
//! A scope (library + filter + sort) is projected into numbered rows so the
//! UI can fetch arbitrary windows and jump by letter. The rows, the alphabet
//! index and the scope metadata are always replaced together.

use crate::error::{LibraryError, Result};
use crate::models::{AlphaIndexEntry, GridRow, ScopeMeta};
use async_trait::async_trait;
use bridge_traits::Clock;
use sqlx::{query, query_as, SqlitePool};
use std::sync::Arc;
use tracing::{debug, instrument};

#[async_trait]
pub trait GridProjectionRepository: Send + Sync {
    /// Atomically replace every row, alphabet entry and the metadata of
    /// `scope_key`.
    ///
    /// On failure the previous state stays visible unchanged.
    async fn replace_index(
        &self,
        scope_key: &str,
        rows: &[GridRow],
        alpha_index: &[AlphaIndexEntry],
        total_count: i64,
    ) -> Result<()>;

    /// Rows with `start <= sort_index <= end`, ordered by `sort_index`.
    async fn get_window(&self, scope_key: &str, start: i64, end: i64) -> Result<Vec<GridRow>>;

    async fn alpha_index(&self, scope_key: &str) -> Result<Vec<AlphaIndexEntry>>;

    /// First index for `letter`, or for the nearest following letter when
    /// no item starts with it.
    async fn offset_for_letter(&self, scope_key: &str, letter: &str) -> Result<Option<i64>>;

    async fn scope_meta(&self, scope_key: &str) -> Result<Option<ScopeMeta>>;

    async fn delete_scope(&self, scope_key: &str) -> Result<()>;
}

pub struct SqliteGridProjectionRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteGridProjectionRepository {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn check_scope(scope_key: &str, rows: &[GridRow], alpha_index: &[AlphaIndexEntry]) -> Result<()> {
    if scope_key.is_empty() {
        return Err(LibraryError::invalid("scope_key", "scope key cannot be empty"));
    }
    if let Some(row) = rows.iter().find(|r| r.scope_key != scope_key) {
        return Err(LibraryError::invalid(
            "rows",
            format!("row {} belongs to scope '{}'", row.sort_index, row.scope_key),
        ));
    }
    if let Some(entry) = alpha_index.iter().find(|e| e.scope_key != scope_key) {
        return Err(LibraryError::invalid(
            "alpha_index",
            format!("letter {} belongs to scope '{}'", entry.letter, entry.scope_key),
        ));
    }
    Ok(())
}

#[async_trait]
impl GridProjectionRepository for SqliteGridProjectionRepository {
    #[instrument(skip(self, rows, alpha_index), fields(rows = rows.len()))]
    async fn replace_index(
        &self,
        scope_key: &str,
        rows: &[GridRow],
        alpha_index: &[AlphaIndexEntry],
        total_count: i64,
    ) -> Result<()> {
        check_scope(scope_key, rows, alpha_index)?;

        let mut tx = self.pool.begin().await?;

        for table in ["grid_rows", "grid_alpha_index", "grid_scope_meta"] {
            query(&format!("DELETE FROM {table} WHERE scope_key = ?"))
                .bind(scope_key)
                .execute(&mut *tx)
                .await?;
        }

        for row in rows {
            query(
                r#"
                INSERT INTO grid_rows (
                    scope_key, sort_index, subject_id, title,
                    sort_name, production_year, primary_image_tag
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.scope_key)
            .bind(row.sort_index)
            .bind(&row.subject_id)
            .bind(&row.title)
            .bind(&row.sort_name)
            .bind(row.production_year)
            .bind(&row.primary_image_tag)
            .execute(&mut *tx)
            .await?;
        }

        for entry in alpha_index {
            query("INSERT INTO grid_alpha_index (scope_key, letter, first_index) VALUES (?, ?, ?)")
                .bind(&entry.scope_key)
                .bind(&entry.letter)
                .bind(entry.first_index)
                .execute(&mut *tx)
                .await?;
        }

        query("INSERT INTO grid_scope_meta (scope_key, total_count, built_at) VALUES (?, ?, ?)")
            .bind(scope_key)
            .bind(total_count)
            .bind(self.clock.unix_timestamp_millis())
            .execute(&mut *tx)
            .await?;

        // Dropping `tx` on any early return above rolls back.
        tx.commit().await?;

        debug!(scope_key, total_count, "Grid projection replaced");
        Ok(())
    }

    async fn get_window(&self, scope_key: &str, start: i64, end: i64) -> Result<Vec<GridRow>> {
        if start > end {
            return Ok(Vec::new());
        }

        let rows = query_as::<_, GridRow>(
            r#"
            SELECT * FROM grid_rows
            WHERE scope_key = ? AND sort_index BETWEEN ? AND ?
            ORDER BY sort_index ASC
            "#,
        )
        .bind(scope_key)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn alpha_index(&self, scope_key: &str) -> Result<Vec<AlphaIndexEntry>> {
        let entries = query_as::<_, AlphaIndexEntry>(
            "SELECT * FROM grid_alpha_index WHERE scope_key = ? ORDER BY first_index ASC",
        )
        .bind(scope_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn offset_for_letter(&self, scope_key: &str, letter: &str) -> Result<Option<i64>> {
        let offset: Option<(i64,)> = query_as(
            r#"
            SELECT first_index FROM grid_alpha_index
            WHERE scope_key = ? AND letter >= ?
            ORDER BY letter ASC
            LIMIT 1
            "#,
        )
        .bind(scope_key)
        .bind(letter.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(offset.map(|(index,)| index))
    }

    async fn scope_meta(&self, scope_key: &str) -> Result<Option<ScopeMeta>> {
        let meta = query_as::<_, ScopeMeta>("SELECT * FROM grid_scope_meta WHERE scope_key = ?")
            .bind(scope_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(meta)
    }

    async fn delete_scope(&self, scope_key: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["grid_rows", "grid_alpha_index", "grid_scope_meta"] {
            query(&format!("DELETE FROM {table} WHERE scope_key = ?"))
                .bind(scope_key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
