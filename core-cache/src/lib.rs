//! # Response Cache Layer
//!
//! In-memory caches sitting between the request executor and its callers:
//!
//! - [`TtlCache`]: memoized `RemoteCallResult`s with per-call TTL
//! - [`MetadataCache`]: entry-count bounded LRU of item metadata
//! - [`ThumbnailCache`]: byte-budget bounded LRU of image bytes
//! - [`GridWindowCache`]: windows of the persisted grid projection
//!
//! [`CacheLayer`] owns the shared instances and reacts to memory pressure.
//! [`DiskCachePolicy`] sizes the on-disk caches the host maintains.

pub mod disk;
pub mod error;
pub mod grid;
pub mod layer;
pub mod memory;
pub mod stats;
pub mod ttl;

pub use disk::{clamp_fraction, DiskCacheKind, DiskCacheLimit, DiskCachePolicy, EvictionPolicy};
pub use error::{CacheError, Result};
pub use grid::GridWindowCache;
pub use layer::CacheLayer;
pub use memory::{MetadataCache, ThumbnailCache};
pub use stats::{CacheStats, ClearReason, ClearableCache};
pub use ttl::{CacheEntry, TtlCache};
