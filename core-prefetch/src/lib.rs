//! # Opportunistic Prefetch
//!
//! Warms the metadata and thumbnail caches with content the user is likely
//! to open next, while the network policy allows it.
//!
//! Two entry points share the same gates and per-item work:
//!
//! - **Reactive**: [`PrefetchScheduler::on_continue_watching_changed`] and
//!   [`PrefetchScheduler::listen`] react to a new continue-watching list.
//! - **Scheduled**: [`PrefetchScheduler::run_job`] fetches the list itself
//!   and runs as a host background task registered through
//!   [`PrefetchScheduler::register_job`].

pub mod error;
pub mod progress;
pub mod scheduler;

pub use error::{PrefetchError, Result};
pub use progress::{PrefetchOutcome, PrefetchProgress, PrefetchTrigger, SkipReason};
pub use scheduler::{thumbnail_key, PrefetchScheduler, PREFETCH_TASK_ID};
