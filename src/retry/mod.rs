//! # Retry Module
//!
//! Two composable layers:
//!
//! - [`backoff`]: the pure delay-growth function shared by every retry path.
//! - [`retry_manager`]: an in-process retry loop for quick sub-retries of a
//!   single downstream call. Stateless across calls: durable retry budgeting
//!   (attempt counts that survive a restart) is the task queue's job.

pub mod backoff;
pub mod retry_manager;

pub use backoff::BackoffConfig;
pub use retry_manager::{RetryConfig, RetryManager};
