//! Workspace placeholder crate.
//!
//! This crate exposes the shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-realtime`). Host applications can
//! depend on `media-core-workspace` and enable the documented features
//! without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "realtime")]
pub use core_realtime as realtime;
