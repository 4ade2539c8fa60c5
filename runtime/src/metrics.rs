//! Metric names recorded by the runtime.
//!
//! The runtime only records through the `metrics` facade; installing an
//! exporter is up to the application. Call [`describe_metrics`] once after
//! installing a recorder to publish descriptions.

use metrics::{describe_counter, describe_histogram, Unit};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Logical sends started.
pub const SENDS_TOTAL: &str = "requester.sends.total";

/// Cycles started, including the first of every send.
pub const CYCLES_TOTAL: &str = "requester.cycles.total";

/// Restarts, labelled by `origin` (`attempt` or `interceptor`).
pub const RESTARTS_TOTAL: &str = "requester.restarts.total";

/// Attempts pre-empted by an interceptor.
pub const INTERCEPTED_TOTAL: &str = "requester.intercepted.total";

/// Logical sends settled, labelled by `outcome`
/// (`success`, `failure` or `cancelled`).
pub const FINISHED_TOTAL: &str = "requester.finished.total";

/// Wall time of a logical send, restarts included.
pub const SEND_DURATION_SECONDS: &str = "requester.send.duration_seconds";

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(SENDS_TOTAL, Unit::Count, "Total number of logical sends started");
    describe_counter!(CYCLES_TOTAL, Unit::Count, "Total number of attempt cycles started");
    describe_counter!(
        RESTARTS_TOTAL,
        Unit::Count,
        "Total number of cycles restarted after a retry"
    );
    describe_counter!(
        INTERCEPTED_TOTAL,
        Unit::Count,
        "Total number of attempts pre-empted by an interceptor"
    );
    describe_counter!(FINISHED_TOTAL, Unit::Count, "Total number of logical sends settled");
    describe_histogram!(
        SEND_DURATION_SECONDS,
        Unit::Seconds,
        "Time from send to settlement, restarts included"
    );
}
