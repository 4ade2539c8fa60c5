//! Contract of the wire transport collaborator.
//!
//! A transport turns one [`RequestOptions`] snapshot into a notification
//! stream: zero or more upload progress items, zero or more download progress
//! items, then exactly one [`TransportEvent::Response`]. Non-2xx statuses are
//! ordinary responses; only connectivity failures are stream errors.
//!
//! Dropping the stream must abort the underlying call.

use crate::error::Error;
use crate::http::{Progress, RawResponse, RequestOptions};
use futures::stream::BoxStream;

/// One notification produced by a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Bytes sent so far
    UploadProgress(Progress),
    /// Bytes received so far
    DownloadProgress(Progress),
    /// Terminal response
    Response(RawResponse),
}

/// Notification stream of one transport call.
pub type TransportStream = BoxStream<'static, Result<TransportEvent, Error>>;

/// Issues outbound calls.
///
/// Implementations are shared between every logical send of a requester and
/// must be cheap to call concurrently.
pub trait Transport: Send + Sync {
    /// Start a call.
    ///
    /// The call must not start doing work before the returned stream is
    /// first polled.
    fn execute(&self, request: RequestOptions) -> TransportStream;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn execute(&self, request: RequestOptions) -> TransportStream {
        (**self).execute(request)
    }
}
