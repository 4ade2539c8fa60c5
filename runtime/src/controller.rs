//! Interception race controller.
//!
//! Drives one logical send through as many cycles as retries demand. Each
//! cycle races the attempt against the armed interceptor watches inside a
//! single task; watches are polled first on every wake, so an interceptor
//! settling together with the attempt wins.
//!
//! | Settled first | Events | Next |
//! |---|---|---|
//! | attempt, response | `ProcessFinished(Ok)` | done |
//! | attempt, error | `Aborted`, `ProcessFinished(Err)` | done |
//! | attempt, retry | `RestartedEvent` | recover, next cycle |
//! | watch, error | `Intercepted`, `Cancelled`, `Aborted`, `ProcessFinished(Err)` | done |
//! | watch, retry | `Intercepted`, `Cancelled`, `RestartedEvent` | recover, next cycle |
//! | cancellation | `Cancelled` | done, no `ProcessFinished` |

use crate::executor::Attempt;
use crate::hub::Hub;
use crate::metrics::{
    CYCLES_TOTAL, FINISHED_TOTAL, INTERCEPTED_TOTAL, RESTARTS_TOTAL, SENDS_TOTAL,
    SEND_DURATION_SECONDS,
};
use crate::watch::{Fired, WatchSet};
use futures::future::poll_fn;
use requester_core::error::{Error, Rejection, Retry};
use requester_core::event::{EventPayload, ProcessId};
use requester_core::http::{RawResponse, RequestOptions};
use requester_core::operator::{Pipeline, WatchId};
use requester_core::transport::Transport;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;
use tokio::sync::watch;

/// How one cycle's race settled.
enum Settled {
    Completed(RawResponse),
    Failed(Rejection),
    Intercepted(Fired),
}

/// Where a restart came from, for the `origin` metric label.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Attempt,
    Interceptor,
}

impl Origin {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Interceptor => "interceptor",
        }
    }
}

/// Supervisor of one logical send.
pub(crate) struct Controller {
    pub(crate) process_id: ProcessId,
    pub(crate) pipeline: Pipeline,
    pub(crate) request: RequestOptions,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) hub: Arc<Hub>,
    pub(crate) max_restarts: Option<u32>,
    cycle: AtomicU32,
}

impl Controller {
    pub(crate) fn new(
        process_id: ProcessId,
        pipeline: Pipeline,
        request: RequestOptions,
        transport: Arc<dyn Transport>,
        hub: Arc<Hub>,
        max_restarts: Option<u32>,
    ) -> Self {
        Self {
            process_id,
            pipeline,
            request,
            transport,
            hub,
            max_restarts,
            cycle: AtomicU32::new(0),
        }
    }

    fn cycle(&self) -> u32 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Run the logical send until it settles or is cancelled.
    ///
    /// Cancellation is requested by setting the watch value or dropping its
    /// sender.
    #[tracing::instrument(
        skip_all,
        name = "requester_send",
        fields(
            process = %self.process_id,
            method = %self.request.method,
            url = %self.request.url,
        )
    )]
    pub(crate) async fn drive(self, mut cancelled: watch::Receiver<bool>) {
        let started = Instant::now();
        metrics::counter!(SENDS_TOTAL).increment(1);

        self.hub.emit(0, EventPayload::ProcessStarted);
        for operator in &self.pipeline.on_start {
            operator.middleware(self.process_id);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancelled.wait_for(|cancelled| *cancelled) => None,
            outcome = self.run_cycles() => Some(outcome),
        };

        self.settle(outcome);
        metrics::histogram!(SEND_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    }

    fn settle(&self, outcome: Option<Result<RawResponse, Error>>) {
        let cycle = self.cycle();
        match outcome {
            None => {
                tracing::debug!(cycle, "Send cancelled");
                self.hub.emit_cancelled(cycle);
                self.handle_error(&Error::cancelled());
                self.end();
                self.hub.close();
                metrics::counter!(FINISHED_TOTAL, "outcome" => "cancelled").increment(1);
            },
            Some(Ok(response)) => {
                tracing::debug!(cycle, status = response.status, "Send finished");
                self.end();
                self.hub.emit(
                    cycle,
                    EventPayload::ProcessFinished {
                        outcome: Ok(response),
                    },
                );
                metrics::counter!(FINISHED_TOTAL, "outcome" => "success").increment(1);
            },
            Some(Err(error)) => {
                tracing::warn!(cycle, error = %error, "Send failed");
                self.handle_error(&error);
                self.end();
                self.hub.emit(
                    cycle,
                    EventPayload::ProcessFinished {
                        outcome: Err(error),
                    },
                );
                metrics::counter!(FINISHED_TOTAL, "outcome" => "failure").increment(1);
            },
        }
    }

    fn handle_error(&self, error: &Error) {
        for operator in &self.pipeline.error_handlers {
            operator.middleware(error);
        }
    }

    fn end(&self) {
        for operator in &self.pipeline.on_end {
            operator.middleware(self.process_id);
        }
    }

    /// Run cycles until one settles terminally.
    async fn run_cycles(&self) -> Result<RawResponse, Error> {
        let mut watches = WatchSet::new();
        let mut affinity: Option<WatchId> = None;
        let mut restarts: u32 = 0;

        loop {
            let cycle = self.cycle();
            if let Some(id) = affinity.take() {
                watches.release(id);
            }
            let started = watches.arm(&self.pipeline.interceptors);
            metrics::counter!(CYCLES_TOTAL).increment(1);
            tracing::debug!(cycle, watches = watches.len(), started, "Cycle started");

            let (rejection, origin) = match self.race(cycle, &mut watches).await {
                Settled::Completed(response) => {
                    watches.clear();
                    return Ok(response);
                },
                Settled::Failed(rejection) => (rejection, Origin::Attempt),
                Settled::Intercepted(fired) => (self.intercepted(cycle, fired), Origin::Interceptor),
            };

            let retry = match rejection {
                Rejection::Error(error) => {
                    watches.clear();
                    return Err(self.abort(cycle, error));
                },
                Rejection::Retry(retry) => retry,
            };

            restarts = restarts.saturating_add(1);
            if self.max_restarts.is_some_and(|max| restarts > max) {
                watches.clear();
                tracing::warn!(cycle, restarts, "Restart limit reached");
                return Err(self.abort(cycle, Error::retrying_rejected(retry.cause().clone())));
            }

            affinity = self.recover(cycle, retry, origin).await.map_err(|error| {
                watches.clear();
                self.abort(self.cycle(), error)
            })?;
        }
    }

    /// Race the attempt of one cycle against every armed watch.
    ///
    /// Whichever loses is dropped before this returns.
    async fn race(&self, cycle: u32, watches: &mut WatchSet) -> Settled {
        let attempt = Attempt {
            pipeline: &self.pipeline,
            transport: self.transport.as_ref(),
            hub: &self.hub,
            cycle,
            request: self.request.clone(),
        };
        let mut attempt = pin!(attempt.run());

        poll_fn(|cx| {
            if let Poll::Ready(fired) = watches.poll_fired(cx) {
                return Poll::Ready(Settled::Intercepted(fired));
            }
            attempt.as_mut().poll(cx).map(|result| match result {
                Ok(response) => Settled::Completed(response),
                Err(rejection) => Settled::Failed(rejection),
            })
        })
        .await
    }

    /// Book-keep a fired watch; the attempt is already torn down.
    fn intercepted(&self, cycle: u32, fired: Fired) -> Rejection {
        tracing::debug!(cycle, watch = %fired.id, persistent = fired.persistent, "Intercepted");
        metrics::counter!(INTERCEPTED_TOTAL).increment(1);

        self.hub.emit(
            cycle,
            EventPayload::Intercepted {
                error: fired.rejection.error().clone(),
            },
        );
        self.hub.emit_cancelled(cycle);

        match fired.rejection {
            Rejection::Retry(retry) if fired.persistent => {
                Rejection::Retry(retry.with_affinity(fired.id))
            },
            rejection => rejection,
        }
    }

    fn abort(&self, cycle: u32, error: Error) -> Error {
        self.hub.emit(
            cycle,
            EventPayload::Aborted {
                error: error.clone(),
            },
        );
        error
    }

    /// Announce the restart, open the next cycle and await the recovery action.
    ///
    /// Returns the affinity token to release before the next cycle.
    async fn recover(
        &self,
        cycle: u32,
        retry: Retry,
        origin: Origin,
    ) -> Result<Option<WatchId>, Error> {
        let (recovery, cause, affinity) = retry.into_parts();
        tracing::debug!(cycle, origin = origin.as_str(), cause = %cause, "Restarting");
        metrics::counter!(RESTARTS_TOTAL, "origin" => origin.as_str()).increment(1);
        self.hub.emit(cycle, EventPayload::Restarted { cause });
        // A cancellation during recovery belongs to the next cycle
        self.cycle.fetch_add(1, Ordering::SeqCst);

        match recovery.await {
            Ok(()) => Ok(affinity),
            Err(error) => {
                tracing::warn!(cycle, error = %error, "Retry recovery failed");
                Err(Error::retrying_rejected(error))
            },
        }
    }
}
