//! Item repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{StoredItem, StoredItemRow, SubjectFlags};
use crate::repositories::flags;
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<StoredItem>>;

    /// Insert or refresh an item from server data.
    ///
    /// Metadata columns are overwritten. Remote flags take the server value
    /// only when no local mutation is pending for them; the watchlist flag is
    /// local and never overwritten.
    async fn upsert(&self, item: &StoredItem) -> Result<()>;

    /// Flags of `id`; all `Confirmed(false)` for unknown subjects.
    async fn flags(&self, id: &str) -> Result<SubjectFlags>;

    async fn count(&self) -> Result<i64>;
}

pub struct SqliteItemRepository {
    pool: SqlitePool,
}

impl SqliteItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<StoredItem>> {
        let row = query_as::<_, StoredItemRow>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(StoredItem::from))
    }

    async fn upsert(&self, item: &StoredItem) -> Result<()> {
        item.validate()
            .map_err(|message| LibraryError::invalid("item", message))?;

        query(
            r#"
            INSERT INTO items (
                id, name, item_type, overview, production_year, runtime_ticks,
                primary_image_tag, favorite, played, watchlist, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                item_type = excluded.item_type,
                overview = excluded.overview,
                production_year = excluded.production_year,
                runtime_ticks = excluded.runtime_ticks,
                primary_image_tag = excluded.primary_image_tag,
                favorite = CASE WHEN items.favorite_prior IS NULL
                    THEN excluded.favorite ELSE items.favorite END,
                played = CASE WHEN items.played_prior IS NULL
                    THEN excluded.played ELSE items.played END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.item_type)
        .bind(&item.overview)
        .bind(item.production_year)
        .bind(item.runtime_ticks)
        .bind(&item.primary_image_tag)
        .bind(item.flags.favorite.confirmed_value())
        .bind(item.flags.played.confirmed_value())
        .bind(item.flags.watchlist.confirmed_value())
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn flags(&self, id: &str) -> Result<SubjectFlags> {
        let mut conn = self.pool.acquire().await?;
        Ok(flags::read_flags(&mut conn, id).await?.unwrap_or_default())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{FlagState, MutationKind};

    fn item(id: &str, name: &str, favorite: bool) -> StoredItem {
        let mut item = StoredItem::new(id, name, 100);
        item.runtime_ticks = Some(42);
        item.flags.favorite = FlagState::Confirmed(favorite);
        item
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::new(pool);

        repo.upsert(&item("a", "Alien", true)).await.unwrap();
        let stored = repo.find_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.name, "Alien");
        assert_eq!(stored.flags.favorite, FlagState::Confirmed(true));

        repo.upsert(&item("a", "Aliens", false)).await.unwrap();
        let stored = repo.find_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.name, "Aliens");
        assert_eq!(stored.flags.favorite, FlagState::Confirmed(false));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_preserves_pending_flags() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::new(pool.clone());
        repo.upsert(&item("a", "Alien", false)).await.unwrap();

        let pending = FlagState::PendingSync {
            value: true,
            prior: false,
        };
        let mut conn = pool.acquire().await.unwrap();
        flags::write_flag(&mut conn, "a", MutationKind::Favorite, pending, 200)
            .await
            .unwrap();
        flags::write_flag(&mut conn, "a", MutationKind::Watchlist, FlagState::Confirmed(true), 200)
            .await
            .unwrap();
        drop(conn);

        repo.upsert(&item("a", "Alien (Director's Cut)", false)).await.unwrap();

        let flags = repo.flags("a").await.unwrap();
        assert_eq!(flags.favorite, pending);
        assert_eq!(flags.watchlist, FlagState::Confirmed(true));
    }

    #[tokio::test]
    async fn test_unknown_subject_has_default_flags() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::new(pool);
        assert_eq!(repo.flags("nope").await.unwrap(), SubjectFlags::default());
        assert!(repo.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_item_rejected() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::new(pool);
        assert!(repo.upsert(&StoredItem::new(" ", "x", 0)).await.is_err());
    }
}
