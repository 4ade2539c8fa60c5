//! Lifecycle events emitted during one logical send.
//!
//! Every event carries the [`ProcessId`] of the send, the restart cycle it was
//! emitted in and a timestamp from the injected clock. The discriminant is
//! exposed as an [`EventKind`] so listeners can subscribe to one kind.

use crate::error::Error;
use crate::http::{Progress, RawResponse, RequestOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical send, stable across its restart cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

/// Discriminant of a [`LifecycleEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// First event of every logical send
    ProcessStarted,
    /// Every guard of the cycle resolved `true`
    PassedGuards,
    /// The transformed request was handed to the transport
    RequestFired,
    /// Upload progress notification
    OnUpload,
    /// Download progress notification
    OnDownload,
    /// The transport delivered a response
    Responded,
    /// Last event of a logical send that was not cancelled
    ProcessFinished,
    /// The attempt failed terminally
    Aborted,
    /// The in-flight attempt was torn down
    Cancelled,
    /// An interceptor fired
    Intercepted,
    /// A new cycle is starting after a retry
    #[serde(rename = "RestartedEvent")]
    Restarted,
}

impl EventKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [Self; 11] = [
        Self::ProcessStarted,
        Self::PassedGuards,
        Self::RequestFired,
        Self::OnUpload,
        Self::OnDownload,
        Self::Responded,
        Self::ProcessFinished,
        Self::Aborted,
        Self::Cancelled,
        Self::Intercepted,
        Self::Restarted,
    ];

    /// Stable identifier of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessStarted => "ProcessStarted",
            Self::PassedGuards => "PassedGuards",
            Self::RequestFired => "RequestFired",
            Self::OnUpload => "OnUpload",
            Self::OnDownload => "OnDownload",
            Self::Responded => "Responded",
            Self::ProcessFinished => "ProcessFinished",
            Self::Aborted => "Aborted",
            Self::Cancelled => "Cancelled",
            Self::Intercepted => "Intercepted",
            Self::Restarted => "RestartedEvent",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific data of a [`LifecycleEvent`].
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// See [`EventKind::ProcessStarted`]
    ProcessStarted,
    /// See [`EventKind::PassedGuards`]
    PassedGuards,
    /// See [`EventKind::RequestFired`]
    RequestFired {
        /// Request after every pre-request transform
        request: RequestOptions,
    },
    /// See [`EventKind::OnUpload`]
    OnUpload {
        /// Bytes sent so far
        progress: Progress,
    },
    /// See [`EventKind::OnDownload`]
    OnDownload {
        /// Bytes received so far
        progress: Progress,
    },
    /// See [`EventKind::Responded`]
    Responded {
        /// Response as delivered by the transport
        response: RawResponse,
    },
    /// See [`EventKind::ProcessFinished`]
    ProcessFinished {
        /// Transformed response, or the terminal error
        outcome: Result<RawResponse, Error>,
    },
    /// See [`EventKind::Aborted`]
    Aborted {
        /// Failure that aborted the attempt
        error: Error,
    },
    /// See [`EventKind::Cancelled`]
    Cancelled,
    /// See [`EventKind::Intercepted`]
    Intercepted {
        /// Error raised by the interceptor
        error: Error,
    },
    /// See [`EventKind::Restarted`]
    Restarted {
        /// Failure that triggered the retry
        cause: Error,
    },
}

/// Point-in-time record of a logical send.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    /// Logical send this event belongs to
    pub process_id: ProcessId,
    /// Restart cycle, starting at zero
    pub cycle: u32,
    /// When the event was emitted
    pub at: DateTime<Utc>,
    /// Variant data
    pub payload: EventPayload,
}

impl LifecycleEvent {
    /// Create an event.
    #[must_use]
    pub const fn new(
        process_id: ProcessId,
        cycle: u32,
        at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            process_id,
            cycle,
            at,
            payload,
        }
    }

    /// Discriminant of the payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::ProcessStarted => EventKind::ProcessStarted,
            EventPayload::PassedGuards => EventKind::PassedGuards,
            EventPayload::RequestFired { .. } => EventKind::RequestFired,
            EventPayload::OnUpload { .. } => EventKind::OnUpload,
            EventPayload::OnDownload { .. } => EventKind::OnDownload,
            EventPayload::Responded { .. } => EventKind::Responded,
            EventPayload::ProcessFinished { .. } => EventKind::ProcessFinished,
            EventPayload::Aborted { .. } => EventKind::Aborted,
            EventPayload::Cancelled => EventKind::Cancelled,
            EventPayload::Intercepted { .. } => EventKind::Intercepted,
            EventPayload::Restarted { .. } => EventKind::Restarted,
        }
    }

    /// `true` for the event that ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.payload, EventPayload::ProcessFinished { .. })
    }

    /// Final outcome, when this is the terminal event.
    #[must_use]
    pub const fn outcome(&self) -> Option<&Result<RawResponse, Error>> {
        match &self.payload {
            EventPayload::ProcessFinished { outcome } => Some(outcome),
            _ => None,
        }
    }
}
