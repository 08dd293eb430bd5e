//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every core crate:
//! - Logging and tracing setup with host log forwarding
//! - Configuration builder and runtime-adjustable settings
//! - Typed event bus
//!
//! ## Overview
//!
//! Other crates depend on this one for the event types they emit, the
//! settings they read on each decision, and the error type used at the
//! configuration boundary.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod settings;

pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use settings::{RuntimeSettings, SettingsHandle};
