//! One guarded, transformed transport call.
//!
//! ```text
//! Start → GuardsChecked → OptionsPrepared → Sent → (Progress)* → Responded → ResponseTransformed
//! ```
//!
//! Any stage's rejection short-circuits the rest. Dropping the future tears
//! down whichever stage is in flight, including the transport call.

use crate::hub::Hub;
use futures::future::try_join_all;
use futures::StreamExt;
use requester_core::error::{Error, ErrorKind, Rejection};
use requester_core::event::EventPayload;
use requester_core::http::{RawResponse, RequestOptions};
use requester_core::operator::{Guard, Pipeline};
use requester_core::transport::{Transport, TransportEvent};

/// Inputs of one attempt.
pub(crate) struct Attempt<'a> {
    pub(crate) pipeline: &'a Pipeline,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) hub: &'a Hub,
    pub(crate) cycle: u32,
    pub(crate) request: RequestOptions,
}

impl Attempt<'_> {
    /// Run the attempt to its transformed response or first rejection.
    pub(crate) async fn run(self) -> Result<RawResponse, Rejection> {
        let Self {
            pipeline,
            transport,
            hub,
            cycle,
            mut request,
        } = self;

        try_join_all(pipeline.guards.iter().map(Guard::middleware)).await?;
        tracing::debug!(cycle, guards = pipeline.guards.len(), "Guards passed");
        hub.emit(cycle, EventPayload::PassedGuards);

        for operator in &pipeline.pre_request {
            request = operator.middleware(request).await?;
        }
        tracing::debug!(cycle, method = %request.method, url = %request.url, "Request fired");
        hub.emit(
            cycle,
            EventPayload::RequestFired {
                request: request.clone(),
            },
        );

        let mut response = None;
        let mut notifications = transport.execute(request);
        while let Some(notification) = notifications.next().await {
            match notification.map_err(|error| error.tagged_or(ErrorKind::Transport))? {
                TransportEvent::UploadProgress(progress) => {
                    hub.emit(cycle, EventPayload::OnUpload { progress });
                },
                TransportEvent::DownloadProgress(progress) => {
                    hub.emit(cycle, EventPayload::OnDownload { progress });
                },
                TransportEvent::Response(raw) => {
                    response = Some(raw);
                    break;
                },
            }
        }
        drop(notifications);

        let mut response = response.ok_or_else(|| {
            Error::new(ErrorKind::Transport, "transport ended without a response")
        })?;
        tracing::debug!(cycle, status = response.status, "Responded");
        hub.emit(
            cycle,
            EventPayload::Responded {
                response: response.clone(),
            },
        );

        for operator in &pipeline.post_request {
            response = operator.middleware(response).await?;
        }
        Ok(response)
    }
}
