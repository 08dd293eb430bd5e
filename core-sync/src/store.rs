//! Transactional writes pairing subject flags with pending mutation rows.
//!
//! A flag is `PendingSync` exactly while its `(subject_id, kind)` row exists
//! in `pending_mutations`; every method here changes both in one transaction.

use crate::error::Result;
use bridge_traits::Clock;
use core_library::repositories::{flags, mutations};
use core_library::{FlagState, MutationKind, PendingMutation, SubjectFlags};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

/// Outcome of closing out a reconciled mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Flag written as `Confirmed`, row removed.
    Done { value: bool },
    /// A newer toggle replaced the row while the call was in flight; the
    /// newer intent stays pending.
    Superseded,
}

pub struct SqliteMutationStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteMutationStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Record the intent to set `kind` of `subject_id` to `desired_value`.
    ///
    /// Returns the new flag state. An existing pending mutation for the same
    /// key is replaced and keeps its original prior value.
    pub async fn toggle(
        &self,
        subject_id: &str,
        kind: MutationKind,
        desired_value: bool,
    ) -> Result<FlagState> {
        let now = self.clock.unix_timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let current = flags::read_flags(&mut tx, subject_id)
            .await?
            .unwrap_or_default()
            .get(kind);
        let next = current.toggled(desired_value);

        flags::write_flag(&mut tx, subject_id, kind, next, now).await?;
        mutations::upsert_pending(
            &mut tx,
            &PendingMutation {
                subject_id: subject_id.to_string(),
                kind,
                desired_value,
                enqueued_at: now,
            },
        )
        .await?;

        tx.commit().await?;
        debug!(subject_id, %kind, desired_value, "mutation recorded");
        Ok(next)
    }

    /// The server (or local authority) accepted `mutation`.
    pub async fn confirm(&self, mutation: &PendingMutation) -> Result<Settled> {
        let now = self.clock.unix_timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let current = mutations::find_pending(&mut tx, &mutation.subject_id, mutation.kind).await?;
        let settled = if current.as_ref() == Some(mutation) {
            flags::write_flag(
                &mut tx,
                &mutation.subject_id,
                mutation.kind,
                FlagState::Confirmed(mutation.desired_value),
                now,
            )
            .await?;
            mutations::delete_pending(&mut tx, &mutation.subject_id, mutation.kind).await?;
            Settled::Done {
                value: mutation.desired_value,
            }
        } else {
            // The applied value is now the server state the newer intent
            // would revert to.
            let flag = flags::read_flags(&mut tx, &mutation.subject_id)
                .await?
                .unwrap_or_default()
                .get(mutation.kind);
            if let FlagState::PendingSync { value, .. } = flag {
                let rebased = FlagState::PendingSync {
                    value,
                    prior: mutation.desired_value,
                };
                flags::write_flag(&mut tx, &mutation.subject_id, mutation.kind, rebased, now)
                    .await?;
            }
            Settled::Superseded
        };

        tx.commit().await?;
        Ok(settled)
    }

    /// Reconciliation of `mutation` failed: restore the prior value.
    pub async fn revert(&self, mutation: &PendingMutation) -> Result<Settled> {
        let now = self.clock.unix_timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let current = mutations::find_pending(&mut tx, &mutation.subject_id, mutation.kind).await?;
        if current.as_ref() != Some(mutation) {
            tx.commit().await?;
            return Ok(Settled::Superseded);
        }

        let flag = flags::read_flags(&mut tx, &mutation.subject_id)
            .await?
            .unwrap_or_default()
            .get(mutation.kind);
        let prior = flag.confirmed_value();
        flags::write_flag(
            &mut tx,
            &mutation.subject_id,
            mutation.kind,
            FlagState::Confirmed(prior),
            now,
        )
        .await?;
        mutations::delete_pending(&mut tx, &mutation.subject_id, mutation.kind).await?;

        tx.commit().await?;
        Ok(Settled::Done { value: prior })
    }

    /// Pending rows, oldest first.
    pub async fn pending(&self) -> Result<Vec<PendingMutation>> {
        let mut conn = self.pool.acquire().await?;
        Ok(mutations::list_pending(&mut conn).await?)
    }

    pub async fn pending_count(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        Ok(mutations::count_pending(&mut conn).await?.max(0) as u64)
    }

    pub async fn flags(&self, subject_id: &str) -> Result<SubjectFlags> {
        let mut conn = self.pool.acquire().await?;
        Ok(flags::read_flags(&mut conn, subject_id)
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use core_library::db::create_test_pool;
    use std::time::Duration;

    async fn store() -> (SqliteMutationStore, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        (SqliteMutationStore::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_toggle_writes_flag_and_row_together() {
        let (store, _) = store().await;
        let state = store.toggle("a", MutationKind::Favorite, true).await.unwrap();

        assert_eq!(
            state,
            FlagState::PendingSync {
                value: true,
                prior: false
            }
        );
        assert_eq!(store.flags("a").await.unwrap().favorite, state);
        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].desired_value);
    }

    #[tokio::test]
    async fn test_coalescing_keeps_one_row_with_latest_value() {
        let (store, clock) = store().await;
        store.toggle("a", MutationKind::Favorite, true).await.unwrap();
        store.toggle("b", MutationKind::Played, true).await.unwrap();
        clock.advance(Duration::from_millis(10));
        store.toggle("a", MutationKind::Favorite, false).await.unwrap();

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].subject_id, "b");
        assert_eq!(pending[1].subject_id, "a");
        assert!(!pending[1].desired_value);
        assert_eq!(
            store.flags("a").await.unwrap().favorite,
            FlagState::PendingSync {
                value: false,
                prior: false
            }
        );
    }

    #[tokio::test]
    async fn test_confirm_and_revert() {
        let (store, _) = store().await;
        store.toggle("a", MutationKind::Favorite, true).await.unwrap();
        store.toggle("a", MutationKind::Played, true).await.unwrap();
        let pending = store.pending().await.unwrap();

        assert_eq!(
            store.confirm(&pending[0]).await.unwrap(),
            Settled::Done { value: true }
        );
        assert_eq!(
            store.revert(&pending[1]).await.unwrap(),
            Settled::Done { value: false }
        );

        let flags = store.flags("a").await.unwrap();
        assert_eq!(flags.favorite, FlagState::Confirmed(true));
        assert_eq!(flags.played, FlagState::Confirmed(false));
        assert!(!flags.has_pending());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_newer_toggle_survives_settling_older_row() {
        let (store, clock) = store().await;
        store.toggle("a", MutationKind::Favorite, true).await.unwrap();
        let in_flight = store.pending().await.unwrap().remove(0);

        clock.advance(Duration::from_millis(5));
        store.toggle("a", MutationKind::Favorite, false).await.unwrap();

        assert_eq!(store.confirm(&in_flight).await.unwrap(), Settled::Superseded);
        assert_eq!(
            store.flags("a").await.unwrap().favorite,
            FlagState::PendingSync {
                value: false,
                prior: true
            }
        );
        assert_eq!(store.revert(&in_flight).await.unwrap(), Settled::Superseded);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }
}
