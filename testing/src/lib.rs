//! # Requester Testing
//!
//! Testing utilities and helpers for the Requester pipeline.
//!
//! This crate provides:
//! - A scripted in-memory transport ([`MockTransport`])
//! - Mock implementations of Environment traits ([`FixedClock`])
//! - Helpers for asserting lifecycle event sequences
//!
//! ## Example
//!
//! ```
//! use requester_core::event::EventKind;
//! use requester_testing::{helpers, MockTransport, Reply};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let transport = MockTransport::new().respond("/users", Reply::json(json!([])));
//! let requester = helpers::test_requester(&transport);
//!
//! let events = requester.get("/users", None).collect_events().await;
//! assert_eq!(helpers::kinds(&events).last(), Some(&EventKind::ProcessFinished));
//! # });
//! ```

use chrono::{DateTime, Utc};
use requester_core::environment::Clock;

/// Scripted in-memory transport
pub mod mock_transport;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use crate::mock_transport::{MockTransport, Reply};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making event timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use requester_testing::mocks::FixedClock;
    /// use requester_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use crate::mocks::{test_clock, MockTransport};
    use requester_core::event::{EventKind, LifecycleEvent};
    use requester_runtime::{Requester, RequesterConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Discriminants of a recorded event sequence.
    #[must_use]
    pub fn kinds(events: &[LifecycleEvent]) -> Vec<EventKind> {
        events.iter().map(LifecycleEvent::kind).collect()
    }

    /// How often `kind` occurs in a recorded event sequence.
    #[must_use]
    pub fn count_of(events: &[LifecycleEvent], kind: EventKind) -> usize {
        events.iter().filter(|event| event.kind() == kind).count()
    }

    /// A requester on `transport` with the fixed test clock and default
    /// configuration.
    #[must_use]
    pub fn test_requester(transport: &MockTransport) -> Requester {
        configured_requester(transport, RequesterConfig::default())
    }

    /// A requester on `transport` with the fixed test clock.
    #[must_use]
    pub fn configured_requester(transport: &MockTransport, config: RequesterConfig) -> Requester {
        Requester::with_environment(Arc::new(transport.clone()), Arc::new(test_clock()), config)
    }

    /// Shared invocation counter for operator closures.
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        /// A counter at zero.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Record one call and return how many came before it.
        pub fn hit(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst)
        }

        /// Calls recorded so far.
        #[must_use]
        pub fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock, MockTransport, Reply};
