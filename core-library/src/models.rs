//! Persisted models owned by the core.

use crate::error::{LibraryError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// User-data flags
// =============================================================================

/// User-data flag a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Favorite,
    Played,
    Watchlist,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [
        MutationKind::Favorite,
        MutationKind::Played,
        MutationKind::Watchlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Favorite => "favorite",
            MutationKind::Played => "played",
            MutationKind::Watchlist => "watchlist",
        }
    }

    /// Value and prior columns of the `items` table for this flag.
    pub(crate) fn columns(&self) -> (&'static str, &'static str) {
        match self {
            MutationKind::Favorite => ("favorite", "favorite_prior"),
            MutationKind::Played => ("played", "played_prior"),
            MutationKind::Watchlist => ("watchlist", "watchlist_prior"),
        }
    }

    /// Whether the server holds the authoritative value for this flag.
    pub fn is_remote(&self) -> bool {
        !matches!(self, MutationKind::Watchlist)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "favorite" => Ok(MutationKind::Favorite),
            "played" => Ok(MutationKind::Played),
            "watchlist" => Ok(MutationKind::Watchlist),
            other => Err(LibraryError::invalid(
                "kind",
                format!("unknown mutation kind '{}'", other),
            )),
        }
    }
}

/// State of a single user-data flag.
///
/// `PendingSync` exists only while a matching pending mutation row exists;
/// both are written in the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlagState {
    Confirmed(bool),
    PendingSync { value: bool, prior: bool },
}

impl FlagState {
    /// Value the UI should show.
    pub fn value(&self) -> bool {
        match self {
            FlagState::Confirmed(value) => *value,
            FlagState::PendingSync { value, .. } => *value,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, FlagState::PendingSync { .. })
    }

    /// Value last confirmed by the server (or locally, for local flags).
    pub fn confirmed_value(&self) -> bool {
        match self {
            FlagState::Confirmed(value) => *value,
            FlagState::PendingSync { prior, .. } => *prior,
        }
    }

    /// Move to `PendingSync { desired }`, keeping the original prior when a
    /// mutation is already pending.
    pub fn toggled(&self, desired: bool) -> FlagState {
        FlagState::PendingSync {
            value: desired,
            prior: self.confirmed_value(),
        }
    }

    pub(crate) fn from_columns(value: bool, prior: Option<bool>) -> Self {
        match prior {
            Some(prior) => FlagState::PendingSync { value, prior },
            None => FlagState::Confirmed(value),
        }
    }

    pub(crate) fn to_columns(self) -> (bool, Option<bool>) {
        match self {
            FlagState::Confirmed(value) => (value, None),
            FlagState::PendingSync { value, prior } => (value, Some(prior)),
        }
    }
}

impl Default for FlagState {
    fn default() -> Self {
        FlagState::Confirmed(false)
    }
}

/// All user-data flags of one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubjectFlags {
    pub favorite: FlagState,
    pub played: FlagState,
    pub watchlist: FlagState,
}

impl SubjectFlags {
    pub fn get(&self, kind: MutationKind) -> FlagState {
        match kind {
            MutationKind::Favorite => self.favorite,
            MutationKind::Played => self.played,
            MutationKind::Watchlist => self.watchlist,
        }
    }

    pub fn has_pending(&self) -> bool {
        MutationKind::ALL.iter().any(|k| self.get(*k).is_pending())
    }
}

// =============================================================================
// Pending mutations
// =============================================================================

/// Durable user intent awaiting reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub subject_id: String,
    pub kind: MutationKind,
    pub desired_value: bool,
    /// Unix timestamp in milliseconds
    pub enqueued_at: i64,
}

#[derive(FromRow)]
pub(crate) struct PendingMutationRow {
    pub subject_id: String,
    pub kind: String,
    pub desired_value: bool,
    pub enqueued_at: i64,
}

impl TryFrom<PendingMutationRow> for PendingMutation {
    type Error = LibraryError;

    fn try_from(row: PendingMutationRow) -> Result<Self> {
        Ok(Self {
            kind: row.kind.parse()?,
            subject_id: row.subject_id,
            desired_value: row.desired_value,
            enqueued_at: row.enqueued_at,
        })
    }
}

// =============================================================================
// Items
// =============================================================================

/// Item record persisted by the prefetch job and flag writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub name: String,
    pub item_type: Option<String>,
    pub overview: Option<String>,
    pub production_year: Option<i32>,
    pub runtime_ticks: Option<i64>,
    pub primary_image_tag: Option<String>,
    pub flags: SubjectFlags,
    /// Unix timestamp in milliseconds
    pub updated_at: i64,
}

impl StoredItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            item_type: None,
            overview: None,
            production_year: None,
            runtime_ticks: None,
            primary_image_tag: None,
            flags: SubjectFlags::default(),
            updated_at,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Item id cannot be empty".to_string());
        }
        if let Some(ticks) = self.runtime_ticks {
            if ticks < 0 {
                return Err("Runtime cannot be negative".to_string());
            }
        }
        Ok(())
    }
}

#[derive(FromRow)]
pub(crate) struct StoredItemRow {
    pub id: String,
    pub name: String,
    pub item_type: Option<String>,
    pub overview: Option<String>,
    pub production_year: Option<i32>,
    pub runtime_ticks: Option<i64>,
    pub primary_image_tag: Option<String>,
    pub favorite: bool,
    pub favorite_prior: Option<bool>,
    pub played: bool,
    pub played_prior: Option<bool>,
    pub watchlist: bool,
    pub watchlist_prior: Option<bool>,
    pub updated_at: i64,
}

impl From<StoredItemRow> for StoredItem {
    fn from(row: StoredItemRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            item_type: row.item_type,
            overview: row.overview,
            production_year: row.production_year,
            runtime_ticks: row.runtime_ticks,
            primary_image_tag: row.primary_image_tag,
            flags: SubjectFlags {
                favorite: FlagState::from_columns(row.favorite, row.favorite_prior),
                played: FlagState::from_columns(row.played, row.played_prior),
                watchlist: FlagState::from_columns(row.watchlist, row.watchlist_prior),
            },
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// Grid projection
// =============================================================================

/// One cell of a browse grid, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GridRow {
    pub scope_key: String,
    pub sort_index: i64,
    pub subject_id: String,
    pub title: String,
    pub sort_name: Option<String>,
    pub production_year: Option<i32>,
    pub primary_image_tag: Option<String>,
}

/// First grid position of items whose sort name starts with `letter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AlphaIndexEntry {
    pub scope_key: String,
    pub letter: String,
    pub first_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ScopeMeta {
    pub scope_key: String,
    pub total_count: i64,
    /// Unix timestamp in milliseconds
    pub built_at: i64,
}
