//! Multicast delivery of the lifecycle events of one logical send.
//!
//! The [`Hub`] keeps the full history of a send so every subscriber, however
//! late, observes the identical sequence. Listeners registered on the
//! descriptor are invoked synchronously for each matching event, outside the
//! hub lock.
//!
//! [`EventStream`] is the caller-facing handle. Each handle is a [`Stream`]
//! of its own subscription; the send is cancelled once every handle is
//! dropped or [`EventStream::cancel`] is called.

use futures::future::BoxFuture;
use futures::stream::Stream;
use futures::{FutureExt, StreamExt};
use requester_core::descriptor::Listener;
use requester_core::environment::Clock;
use requester_core::error::Error;
use requester_core::event::{EventKind, EventPayload, LifecycleEvent, ProcessId};
use requester_core::http::{Body, RawResponse};
use std::fmt;
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

struct HubState {
    history: Vec<LifecycleEvent>,
    subscribers: Vec<mpsc::UnboundedSender<LifecycleEvent>>,
    closed: bool,
    cancelled_cycle: Option<u32>,
}

/// Event fan-out of one logical send.
pub(crate) struct Hub {
    process_id: ProcessId,
    clock: Arc<dyn Clock>,
    listeners: Vec<(EventKind, Listener)>,
    state: Mutex<HubState>,
}

impl Hub {
    pub(crate) fn new(
        process_id: ProcessId,
        clock: Arc<dyn Clock>,
        listeners: Vec<(EventKind, Listener)>,
        capacity: usize,
    ) -> Self {
        Self {
            process_id,
            clock,
            listeners,
            state: Mutex::new(HubState {
                history: Vec::with_capacity(capacity),
                subscribers: Vec::new(),
                closed: false,
                cancelled_cycle: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) const fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Publish an event to the history, every subscriber and every matching
    /// listener. Events after the hub closed are dropped.
    pub(crate) fn emit(&self, cycle: u32, payload: EventPayload) {
        let event = LifecycleEvent::new(self.process_id, cycle, self.clock.now(), payload);
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state
                .subscribers
                .retain(|subscriber| subscriber.send(event.clone()).is_ok());
            state.history.push(event.clone());
            if event.is_terminal() {
                state.closed = true;
                state.subscribers.clear();
            }
        }

        tracing::trace!(
            process = %self.process_id,
            cycle,
            kind = %event.kind(),
            "Lifecycle event"
        );

        let kind = event.kind();
        for (_, listener) in self.listeners.iter().filter(|(k, _)| *k == kind) {
            listener(&event);
        }
    }

    /// Emit `Cancelled` unless it was already emitted for this cycle.
    pub(crate) fn emit_cancelled(&self, cycle: u32) -> bool {
        {
            let mut state = self.lock();
            if state.closed || state.cancelled_cycle == Some(cycle) {
                return false;
            }
            state.cancelled_cycle = Some(cycle);
        }
        self.emit(cycle, EventPayload::Cancelled);
        true
    }

    /// End every subscription without a terminal event.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for event in &state.history {
            // The receiver is alive in this scope
            let _ = sender.send(event.clone());
        }
        if !state.closed {
            state.subscribers.push(sender);
        }
        receiver
    }

    fn history(&self) -> Vec<LifecycleEvent> {
        self.lock().history.clone()
    }

    fn outcome(&self) -> Option<Result<RawResponse, Error>> {
        self.lock()
            .history
            .iter()
            .rev()
            .find_map(LifecycleEvent::outcome)
            .cloned()
    }
}

/// Cancels the send when the last handle holding it is dropped.
struct CancelHandle {
    trigger: watch::Sender<bool>,
}

impl CancelHandle {
    fn cancel(&self) {
        self.trigger.send_replace(true);
    }
}

/// Event sequence of one logical send.
///
/// Every handle (the one returned by `send` and each clone) yields the full
/// sequence from `ProcessStarted` onwards, ending after `ProcessFinished`, or
/// after `Cancelled` when the send is cancelled.
///
/// Awaiting the handle collapses it to the parsed response body, or the
/// terminal error.
///
/// # Example
///
/// ```no_run
/// # use requester_runtime::Requester;
/// # async fn example(requester: Requester) -> Result<(), requester_core::Error> {
/// use futures::StreamExt;
///
/// let mut events = requester.get("/users", None);
/// let observer = events.clone();
///
/// while let Some(event) = events.next().await {
///     println!("{}", event.kind());
/// }
/// let body = observer.await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "dropping every EventStream handle cancels the send"]
pub struct EventStream {
    hub: Arc<Hub>,
    cancel: Arc<CancelHandle>,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl EventStream {
    pub(crate) fn new(hub: Arc<Hub>, trigger: watch::Sender<bool>) -> Self {
        let events = hub.subscribe();
        Self {
            hub,
            cancel: Arc::new(CancelHandle { trigger }),
            events,
        }
    }

    /// Identifier of the logical send.
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.hub.process_id()
    }

    /// Cancel the send.
    ///
    /// Tears down the in-flight attempt and every watch, emits `Cancelled`,
    /// and ends every handle without `ProcessFinished`. No-op once finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Events emitted so far.
    #[must_use]
    pub fn history(&self) -> Vec<LifecycleEvent> {
        self.hub.history()
    }

    /// Wait for the send to settle and return the transformed response.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of the send, or an
    /// [`ErrorKind::Cancelled`](requester_core::ErrorKind::Cancelled) error
    /// when it was cancelled.
    pub async fn response(mut self) -> Result<RawResponse, Error> {
        while let Some(event) = self.events.recv().await {
            if let Some(outcome) = event.outcome() {
                return outcome.clone();
            }
        }
        self.hub.outcome().unwrap_or_else(|| Err(Error::cancelled()))
    }

    /// Wait for the stream to end and return every event it yielded.
    pub async fn collect_events(self) -> Vec<LifecycleEvent> {
        StreamExt::collect(self).await
    }
}

impl Clone for EventStream {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            cancel: Arc::clone(&self.cancel),
            events: self.hub.subscribe(),
        }
    }
}

impl Stream for EventStream {
    type Item = LifecycleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl IntoFuture for EventStream {
    type Output = Result<Body, Error>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.response()
            .map(|outcome| outcome.map(|response| response.body))
            .boxed()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("process_id", &self.hub.process_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use requester_core::environment::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hub(listeners: Vec<(EventKind, Listener)>) -> Arc<Hub> {
        Arc::new(Hub::new(ProcessId::new(7), Arc::new(SystemClock), listeners, 4))
    }

    fn kinds(events: &[LifecycleEvent]) -> Vec<EventKind> {
        events.iter().map(LifecycleEvent::kind).collect()
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_full_history() {
        let hub = hub(Vec::new());
        let (trigger, _cancelled) = watch::channel(false);
        let early = EventStream::new(Arc::clone(&hub), trigger);

        hub.emit(0, EventPayload::ProcessStarted);
        hub.emit(0, EventPayload::PassedGuards);
        let late = early.clone();
        hub.emit(
            0,
            EventPayload::ProcessFinished {
                outcome: Ok(RawResponse::ok("done")),
            },
        );
        hub.emit(0, EventPayload::PassedGuards);

        let expected = vec![
            EventKind::ProcessStarted,
            EventKind::PassedGuards,
            EventKind::ProcessFinished,
        ];
        assert_eq!(kinds(&late.collect_events().await), expected);
        assert_eq!(kinds(&early.collect_events().await), expected);
    }

    #[tokio::test]
    async fn test_listeners_only_see_their_kind() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener: Listener = Arc::new(move |event| {
            assert_eq!(event.kind(), EventKind::PassedGuards);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let hub = hub(vec![(EventKind::PassedGuards, listener)]);

        hub.emit(0, EventPayload::ProcessStarted);
        hub.emit(0, EventPayload::PassedGuards);
        hub.emit(1, EventPayload::PassedGuards);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_is_emitted_once_per_cycle() {
        let hub = hub(Vec::new());
        assert!(hub.emit_cancelled(0));
        assert!(!hub.emit_cancelled(0));
        assert!(hub.emit_cancelled(1));
        hub.close();
        assert!(!hub.emit_cancelled(2));
        assert_eq!(
            kinds(&hub.history()),
            vec![EventKind::Cancelled, EventKind::Cancelled]
        );
    }

    #[tokio::test]
    async fn test_response_after_close_without_outcome_is_cancelled() {
        let hub = hub(Vec::new());
        let (trigger, _cancelled) = watch::channel(false);
        let stream = EventStream::new(Arc::clone(&hub), trigger);
        hub.emit(0, EventPayload::ProcessStarted);
        hub.close();

        let outcome = stream.await;
        assert!(outcome.is_err_and(|e| e.is(requester_core::ErrorKind::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropping_every_handle_triggers_cancel() {
        let hub = hub(Vec::new());
        let (trigger, mut cancelled) = watch::channel(false);
        let stream = EventStream::new(hub, trigger);
        let clone = stream.clone();

        drop(stream);
        assert!(!*cancelled.borrow_and_update());
        drop(clone);
        assert!(cancelled.changed().await.is_err());
    }
}
