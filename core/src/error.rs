//! Error taxonomy for the request pipeline.
//!
//! Every failure carries a tag ([`ErrorKind`]) and an opaque cause. Operators
//! report failures as a [`Rejection`]: either a terminal [`Error`] or a
//! [`Retry`] control signal that asks the controller to restart the cycle
//! once its recovery action settles.
//!
//! # Example
//!
//! ```
//! use requester_core::error::{Error, ErrorKind};
//!
//! let error = Error::custom("connection reset");
//! assert_eq!(error.kind(), ErrorKind::Unknown);
//!
//! // Untagged errors adopt the tag of the operator that raised them
//! let tagged = error.tagged_or(ErrorKind::GuardRejected);
//! assert_eq!(tagged.kind(), ErrorKind::GuardRejected);
//! assert_eq!(tagged.cause().to_string(), "connection reset");
//! ```

use crate::operator::WatchId;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Shared, type-erased cause of an [`Error`].
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Recovery action carried by a [`Retry`].
///
/// The cycle restarts only after this future resolves `Ok`.
pub type Recovery = BoxFuture<'static, Result<(), Error>>;

/// Tag identifying where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised by user code without a more specific tag
    Unknown,
    /// Transport or connectivity failure
    Transport,
    /// A guard resolved `false` or failed
    GuardRejected,
    /// A pre-request transform failed
    PreRequestFailed,
    /// A post-request transform failed
    PostRequestFailed,
    /// An interceptor aborted the in-flight attempt
    Intercepted,
    /// The logical send was cancelled
    Cancelled,
    /// The recovery action of a retry failed
    RetryingRejected,
    /// Restart signal (never terminal)
    Retry,
}

impl ErrorKind {
    /// Stable identifier of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UnknownError",
            Self::Transport => "TransportError",
            Self::GuardRejected => "GuardRejected",
            Self::PreRequestFailed => "PreRequestFailed",
            Self::PostRequestFailed => "PostRequestFailed",
            Self::Intercepted => "Intercepted",
            Self::Cancelled => "Cancelled",
            Self::RetryingRejected => "RetryingRejected",
            Self::Retry => "Retry",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain message used as a cause when no richer error exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct Message(pub String);

/// Tagged pipeline error.
///
/// Cloning is cheap: the cause is shared, so the same error can be handed to
/// error handlers, lifecycle events and every stream subscriber.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {cause}")]
pub struct Error {
    kind: ErrorKind,
    cause: Cause,
}

impl Error {
    /// Create an error with the given tag and cause.
    ///
    /// Accepts anything convertible into a boxed error, including `&str`
    /// and `String`.
    pub fn new<C>(kind: ErrorKind, cause: C) -> Self
    where
        C: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            cause: Arc::from(cause.into()),
        }
    }

    /// Create an untagged error from user code.
    pub fn custom<C>(cause: C) -> Self
    where
        C: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, cause)
    }

    /// Error reported when a logical send is cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, Message("request cancelled".to_string()))
    }

    /// Re-tag a failed recovery action as terminal.
    #[must_use]
    pub fn retrying_rejected(cause: Self) -> Self {
        Self {
            kind: ErrorKind::RetryingRejected,
            cause: Arc::new(cause),
        }
    }

    /// The tag of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Check the tag of this error.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// The underlying cause.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.cause
    }

    /// Downcast the cause to a concrete error type.
    #[must_use]
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: std::error::Error + 'static,
    {
        self.cause.downcast_ref::<T>()
    }

    /// Adopt `kind` when this error is still untagged, preserving the cause.
    ///
    /// Already tagged errors pass through unchanged.
    #[must_use]
    pub fn tagged_or(self, kind: ErrorKind) -> Self {
        if self.kind == ErrorKind::Unknown {
            Self {
                kind,
                cause: self.cause,
            }
        } else {
            self
        }
    }
}

/// Restart signal raised by an operator.
///
/// Carries the recovery action to await before the next cycle, the failure
/// that triggered it, and optionally the [`WatchId`] of the persistent watch
/// that produced it so that watch is re-registered rather than kept.
pub struct Retry {
    recovery: Recovery,
    cause: Error,
    affinity: Option<WatchId>,
}

impl Retry {
    /// Create a retry from a recovery future and the triggering cause.
    pub fn new<F>(recovery: F, cause: Error) -> Self
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            recovery: recovery.boxed(),
            cause,
            affinity: None,
        }
    }

    /// The failure that triggered the retry.
    #[must_use]
    pub const fn cause(&self) -> &Error {
        &self.cause
    }

    /// The watch this retry originated from, if any.
    #[must_use]
    pub const fn affinity(&self) -> Option<WatchId> {
        self.affinity
    }

    /// Attach the originating watch.
    #[must_use]
    pub fn with_affinity(mut self, watch: WatchId) -> Self {
        self.affinity = Some(watch);
        self
    }

    /// Split into recovery action, cause and affinity token.
    #[must_use]
    pub fn into_parts(self) -> (Recovery, Error, Option<WatchId>) {
        (self.recovery, self.cause, self.affinity)
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("cause", &self.cause)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

/// Failure of an operator middleware or of a whole attempt.
#[derive(Error, Debug)]
pub enum Rejection {
    /// Terminal failure
    #[error("{0}")]
    Error(Error),

    /// Restart the cycle after recovery
    #[error("retry requested after {}", .0.cause())]
    Retry(Retry),
}

impl Rejection {
    /// Tag of the rejection; [`ErrorKind::Retry`] for restart signals.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Error(error) => error.kind(),
            Self::Retry(_) => ErrorKind::Retry,
        }
    }

    /// `true` when this is a restart signal.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }

    /// The terminal error, or the cause of a retry.
    #[must_use]
    pub const fn error(&self) -> &Error {
        match self {
            Self::Error(error) => error,
            Self::Retry(retry) => retry.cause(),
        }
    }
}

impl From<Error> for Rejection {
    fn from(error: Error) -> Self {
        Self::Error(error)
    }
}

impl From<Retry> for Rejection {
    fn from(retry: Retry) -> Self {
        Self::Retry(retry)
    }
}
