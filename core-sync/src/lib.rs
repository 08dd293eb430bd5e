//! # Offline Mutation Queue
//!
//! Durable log of user-data intents made while offline (or before the server
//! answered), applied optimistically and reconciled later.
//!
//! - [`SqliteMutationStore`] pairs flag writes with pending rows in one
//!   transaction
//! - [`OfflineMutationQueue`] records intents and drains them through the
//!   request executor
//! - [`DrainTriggers`] runs drains on a timer, on reconnect and on request

pub mod error;
pub mod queue;
pub mod store;
pub mod triggers;

pub use error::{Result, SyncError};
pub use queue::{
    DrainReport, DrainSkipReason, DrainSummary, OfflineMutationQueue, RevertListener,
};
pub use store::{Settled, SqliteMutationStore};
pub use triggers::DrainTriggers;
