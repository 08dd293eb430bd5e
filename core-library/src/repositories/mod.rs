//! # Repository Pattern Implementation
//!
//! Data access for the tables this core owns.
//!
//! - `GridProjectionRepository` - windowed browse grids, replaced atomically
//! - `ItemRepository` - item records written by prefetch and reconciliation
//! - [`flags`] and [`mutations`] - connection-level helpers that callers
//!   compose inside a single transaction

pub mod flags;
pub mod grid;
pub mod item;
pub mod mutations;

pub use grid::{GridProjectionRepository, SqliteGridProjectionRepository};
pub use item::{ItemRepository, SqliteItemRepository};
