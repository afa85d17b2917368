//! # Turnstile Runtime
//!
//! Operational plumbing shared by Turnstile services.
//!
//! ## Components
//!
//! - **Retry**: bounded exponential backoff with an error predicate, used by the
//!   reservation engine to ride out lock contention
//! - **Metrics**: Prometheus exporter with an HTTP scrape endpoint
//!
//! ## Example
//!
//! ```rust
//! use turnstile_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(20))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(7) },
//!     |err: &String| err.starts_with("contention"),
//! )
//! .await?;
//! assert_eq!(value, 7);
//! # Ok(())
//! # }
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_with_predicate};
