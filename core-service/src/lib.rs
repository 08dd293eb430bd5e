//! Core service façade.
//!
//! Builds every component from a [`CoreConfig`] and routes host signals
//! (session credentials, connectivity, memory pressure, settings changes) to
//! them. Desktop hosts enable the `desktop-shims` feature so missing bridges
//! default to the `bridge-desktop` implementations.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder()
//!     .database_path("media.db")
//!     .enable_realtime(true)
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//! core.sign_in(session, || tracing::warn!("credentials rejected")).await;
//! core.toggle("item-id", MutationKind::Favorite, true).await?;
//! ```

pub mod error;
mod jobs;
pub mod service;

pub use core_runtime::config::{CoreConfig, CoreConfigBuilder, FeatureFlags};
pub use error::{Result, ServiceError};
pub use jobs::DRAIN_TASK_ID;
pub use service::CoreService;
