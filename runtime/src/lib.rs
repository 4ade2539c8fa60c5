//! # Requester Runtime
//!
//! Runtime for the Requester outbound-request pipeline.
//!
//! This crate turns an immutable descriptor into a running logical send:
//! it runs the attempt, races interceptors against it, restarts on retry, and
//! publishes everything as a multicast lifecycle event stream.
//!
//! ## Core Components
//!
//! - **Requester**: fluent builder handle and `send` entry point
//! - **`EventStream`**: multicast lifecycle events; awaitable for the body
//! - **Controller**: the interception race and restart loop
//! - **Attempt executor**: guards → pre-request → transport → post-request
//! - **Backoff**: exponential recovery actions for `retry_with`
//!
//! ## Example
//!
//! ```no_run
//! use requester_core::operator::{Guard, Interceptor};
//! use requester_core::transport::Transport;
//! use requester_runtime::backoff::BackoffPolicy;
//! use requester_runtime::Requester;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), requester_core::Error> {
//! let api = Requester::new(transport)
//!     .set_host("https://api.example.com")
//!     .add_operator(Guard::allow_if(|| true).retry_with(BackoffPolicy::default().recovery()))
//!     .add_operator(Interceptor::new(|| async {
//!         tokio::time::sleep(Duration::from_secs(10)).await;
//!         Err(requester_core::Error::custom("timed out"))
//!     }));
//!
//! let body = api.get("/users", None).await?;
//! # Ok(())
//! # }
//! ```

/// Exponential backoff recovery actions
pub mod backoff;

/// Runtime configuration
pub mod config;

/// Metric names and descriptions
pub mod metrics;

mod controller;
mod executor;
mod hub;
mod requester;
mod watch;

pub use config::RequesterConfig;
pub use hub::EventStream;
pub use requester::{RequestPatch, Requester, SendOptions};

/// Error types for the runtime
pub mod error {
    use thiserror::Error;

    /// Errors raised while building a [`RequesterConfig`](crate::RequesterConfig)
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ConfigError {
        /// An environment variable could not be parsed
        #[error("Invalid value for {variable}: {value:?}")]
        Parse {
            /// Variable name
            variable: &'static str,
            /// Raw value
            value: String,
        },

        /// A field holds a value the runtime cannot honour
        #[error("Invalid configuration field {field}: {reason}")]
        Invalid {
            /// Field name
            field: &'static str,
            /// Why the value was rejected
            reason: String,
        },
    }
}
