//! Scripted in-memory transport.
//!
//! Routes are matched in registration order against every request handed to
//! the transport; one-shot routes are consumed by their first match. A
//! request no route matches hangs until it is cancelled, which makes
//! "transport slower than everything else" the default.

use async_stream::stream;
use futures::StreamExt;
use requester_core::error::{Error, ErrorKind};
use requester_core::http::{Method, Progress, RawResponse, RequestOptions};
use requester_core::transport::{Transport, TransportEvent, TransportStream};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Scripted outcome of one matched request.
#[derive(Debug, Clone)]
pub struct Reply {
    outcome: Result<RawResponse, Error>,
    delay: Duration,
    upload: Vec<Progress>,
    download: Vec<Progress>,
}

impl Reply {
    /// Respond with the given response.
    #[must_use]
    pub const fn response(response: RawResponse) -> Self {
        Self {
            outcome: Ok(response),
            delay: Duration::ZERO,
            upload: Vec::new(),
            download: Vec::new(),
        }
    }

    /// `200 OK` with a JSON body.
    #[must_use]
    pub fn json(value: serde_json::Value) -> Self {
        Self::response(RawResponse::ok(value))
    }

    /// `200 OK` with a text body.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::response(RawResponse::ok(text.into()))
    }

    /// Any status with a JSON body.
    #[must_use]
    pub fn status(status: u16, value: serde_json::Value) -> Self {
        Self::response(RawResponse::new(status, value))
    }

    /// Fail the call with a connectivity error.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(Error::new(ErrorKind::Transport, message.into())),
            ..Self::response(RawResponse::ok(serde_json::Value::Null))
        }
    }

    /// Wait before producing any notification.
    #[must_use]
    pub const fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Emit an upload progress notification before the outcome.
    #[must_use]
    pub fn upload(mut self, loaded: u64, total: u64) -> Self {
        self.upload.push(Progress::new(loaded, Some(total)));
        self
    }

    /// Emit a download progress notification before the outcome.
    #[must_use]
    pub fn download(mut self, loaded: u64, total: u64) -> Self {
        self.download.push(Progress::new(loaded, Some(total)));
        self
    }
}

type Predicate = Arc<dyn Fn(&RequestOptions) -> bool + Send + Sync>;

enum Matcher {
    Route { method: Option<Method>, url: String },
    Predicate(Predicate),
}

impl Matcher {
    fn matches(&self, request: &RequestOptions) -> bool {
        match self {
            Self::Route { method, url } => {
                method.is_none_or(|method| method == request.method) && *url == request.url
            },
            Self::Predicate(predicate) => predicate(request),
        }
    }
}

struct Route {
    matcher: Matcher,
    reply: Reply,
    once: bool,
}

#[derive(Default)]
struct MockState {
    routes: Vec<Route>,
    fallback: Option<Reply>,
    fired: Vec<RequestOptions>,
    completed: usize,
    cancelled: usize,
}

impl MockState {
    fn reply_for(&mut self, request: &RequestOptions) -> Option<Reply> {
        let index = self
            .routes
            .iter()
            .position(|route| route.matcher.matches(request));
        match index {
            Some(index) if self.routes[index].once => Some(self.routes.remove(index).reply),
            Some(index) => Some(self.routes[index].reply.clone()),
            None => self.fallback.clone(),
        }
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts a call as cancelled when dropped before it settled.
struct CallGuard {
    state: Arc<Mutex<MockState>>,
    settled: bool,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if self.settled {
            state.completed += 1;
        } else {
            state.cancelled += 1;
        }
    }
}

/// In-memory [`Transport`] answering from scripted routes.
///
/// Clones share routes and records.
///
/// # Example
///
/// ```
/// use requester_testing::{MockTransport, Reply};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let transport = MockTransport::new()
///     .respond("https://api.test/users", Reply::json(json!([])))
///     .respond_once("https://api.test/flaky", Reply::fail("connection reset"))
///     .respond("https://api.test/flaky", Reply::json(json!({})).after(Duration::from_millis(5)));
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn route(self, matcher: Matcher, reply: Reply, once: bool) -> Self {
        lock(&self.state).routes.push(Route {
            matcher,
            reply,
            once,
        });
        self
    }

    /// Answer every request to `url`, whatever its verb.
    #[must_use]
    pub fn respond(self, url: impl Into<String>, reply: Reply) -> Self {
        let url = url.into();
        self.route(Matcher::Route { method: None, url }, reply, false)
    }

    /// Answer the next request to `url` only.
    #[must_use]
    pub fn respond_once(self, url: impl Into<String>, reply: Reply) -> Self {
        let url = url.into();
        self.route(Matcher::Route { method: None, url }, reply, true)
    }

    /// Answer every `method` request to `url`.
    #[must_use]
    pub fn respond_to(self, method: Method, url: impl Into<String>, reply: Reply) -> Self {
        let url = url.into();
        self.route(
            Matcher::Route {
                method: Some(method),
                url,
            },
            reply,
            false,
        )
    }

    /// Answer every request the predicate accepts.
    #[must_use]
    pub fn respond_when<F>(self, predicate: F, reply: Reply) -> Self
    where
        F: Fn(&RequestOptions) -> bool + Send + Sync + 'static,
    {
        self.route(Matcher::Predicate(Arc::new(predicate)), reply, false)
    }

    /// Answer requests no route matches.
    #[must_use]
    pub fn fallback(self, reply: Reply) -> Self {
        lock(&self.state).fallback = Some(reply);
        self
    }

    /// Every request handed to the transport, in order.
    #[must_use]
    pub fn fired(&self) -> Vec<RequestOptions> {
        lock(&self.state).fired.clone()
    }

    /// Number of requests handed to the transport.
    #[must_use]
    pub fn fired_count(&self) -> usize {
        lock(&self.state).fired.len()
    }

    /// Calls that delivered their outcome.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        lock(&self.state).completed
    }

    /// Calls torn down before delivering their outcome.
    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        lock(&self.state).cancelled
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: RequestOptions) -> TransportStream {
        let state = Arc::clone(&self.state);

        stream! {
            let reply = {
                let mut state = lock(&state);
                state.fired.push(request.clone());
                state.reply_for(&request)
            };
            let mut guard = CallGuard {
                state: Arc::clone(&state),
                settled: false,
            };

            let Some(reply) = reply else {
                futures::future::pending::<()>().await;
                return;
            };

            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            for progress in reply.upload {
                yield Ok(TransportEvent::UploadProgress(progress));
            }
            for progress in reply.download {
                yield Ok(TransportEvent::DownloadProgress(progress));
            }

            guard.settled = true;
            match reply.outcome {
                Ok(mut response) => {
                    if response.url.is_empty() {
                        response.url = request.url.clone();
                    }
                    yield Ok(TransportEvent::Response(response));
                },
                Err(error) => yield Err(error),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MockTransport")
            .field("routes", &state.routes.len())
            .field("fired", &state.fired.len())
            .field("cancelled", &state.cancelled)
            .finish_non_exhaustive()
    }
}
