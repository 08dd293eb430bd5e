//! # Request Executor
//!
//! Mediates every call to the media server:
//! - Priority admission through a bounded [`PriorityDispatcher`]
//! - Process-wide adaptive throttling ([`RateLimiter`])
//! - Retry with exponential backoff for transient failures
//! - Failure classification into [`ErrorKind`]
//! - Per-endpoint health for choosing between connection methods
//!
//! ## Usage
//!
//! ```ignore
//! let result = executor
//!     .execute(Priority::High, Some(endpoint), || api.get_item(endpoint, id))
//!     .await;
//!
//! match result {
//!     RemoteCallResult::Success(item) => show(item),
//!     RemoteCallResult::Error(err) if err.kind == ErrorKind::Auth => sign_out(),
//!     RemoteCallResult::Error(err) => toast(err.message),
//!     RemoteCallResult::Loading => {}
//! }
//! ```

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod health;
pub mod rate_limit;
pub mod result;

pub use dispatcher::{DispatchPermit, Priority, PriorityDispatcher};
pub use error::{RequestError, Result};
pub use executor::{backoff_delay, RequestExecutor};
pub use health::{EndpointHealth, EndpointHealthRegistry};
pub use rate_limit::{AdaptiveRateLimiter, RateLimiter};
pub use result::{classify, Classification, ErrorKind, RemoteCallResult, RemoteError};
