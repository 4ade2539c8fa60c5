//! # Requester Core
//!
//! Value types and contracts of the Requester outbound-request pipeline.
//!
//! This crate has no runtime: it defines what a request is and what can
//! happen to it. Driving a send lives in `requester-runtime`.
//!
//! ## Core Concepts
//!
//! - **Descriptor**: immutable request configuration with ancestor fallback
//! - **Operator**: typed middleware bound to one lifecycle phase
//! - **`LifecycleEvent`**: one point-in-time record of a logical send
//! - **Error / Retry**: tagged failures and the restart control signal
//! - **Transport**: the external collaborator that performs the call
//! - **Environment**: injected dependencies (the clock)
//!
//! ## Example
//!
//! ```
//! use requester_core::descriptor::Descriptor;
//! use requester_core::http::ResponseType;
//! use requester_core::operator::{Guard, PreRequest};
//!
//! let api = Descriptor::root()
//!     .with_host("https://api.example.com")
//!     .with_operators([
//!         Guard::allow_if(|| true).into(),
//!         PreRequest::map(|options| options.with_header("x-client", "docs")).into(),
//!     ]);
//!
//! let users = api.with_path("users");
//! let options = users.request_options(ResponseType::Json);
//! assert_eq!(options.url, "https://api.example.com/users");
//! assert_eq!(users.operators().len(), 2);
//! ```

pub mod descriptor;
pub mod error;
pub mod event;
pub mod http;
pub mod operator;
pub mod transport;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use descriptor::{Descriptor, Listener};
pub use error::{Error, ErrorKind, Rejection, Retry};
pub use event::{EventKind, EventPayload, LifecycleEvent, ProcessId};
pub use http::{Body, Method, MultiMap, Progress, RawResponse, RequestOptions, ResponseType};
pub use operator::{
    ErrorHandler, Guard, Interceptor, OnEnd, OnStart, Operator, OperatorKind, Pipeline,
    PostRequest, PreRequest, WatchId,
};
pub use transport::{Transport, TransportEvent, TransportStream};

/// Environment module - injected dependencies.
///
/// All external dependencies of the pipeline besides the transport are
/// abstracted behind traits here so tests can substitute deterministic
/// implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every lifecycle event is timestamped through this trait.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock reading the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

}
