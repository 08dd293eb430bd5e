//! # Library Store
//!
//! SQLite-backed persistence for the tables the core owns:
//! - Item records with per-flag optimistic state
//! - The pending mutation log
//! - Windowed grid projections with alphabet index
//!
//! Schema changes live in `migrations/` and are embedded at compile time.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{
    AlphaIndexEntry, FlagState, GridRow, MutationKind, PendingMutation, ScopeMeta, StoredItem,
    SubjectFlags,
};
pub use repositories::{
    GridProjectionRepository, ItemRepository, SqliteGridProjectionRepository,
    SqliteItemRepository,
};
