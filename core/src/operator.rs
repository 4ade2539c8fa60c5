//! Operators: typed middleware bound to one lifecycle phase.
//!
//! The set of categories is closed. Each category wraps a user closure and
//! exposes a single `middleware` entry point whose signature depends on the
//! phase it runs in:
//!
//! | Operator | Phase | Middleware |
//! |---|---|---|
//! | [`OnStart`] | before guards | `fn(ProcessId)` |
//! | [`Guard`] | before transport | `async fn() -> Result<(), Rejection>` |
//! | [`PreRequest`] | before transport | `async fn(RequestOptions) -> Result<RequestOptions, Rejection>` |
//! | [`Interceptor`] | alongside transport | `async fn() -> Rejection` (pending while watching) |
//! | [`PostRequest`] | after response | `async fn(RawResponse) -> Result<RawResponse, Rejection>` |
//! | [`ErrorHandler`] | on terminal error | `fn(&Error)` |
//! | [`OnEnd`] | always, last | `fn(ProcessId)` |
//!
//! Failures raised by user closures that are still untagged adopt the
//! category's own [`ErrorKind`]. Operators configured with `retry_with`
//! raise a [`Retry`] instead of a terminal error.

use crate::error::{Error, ErrorKind, Rejection, Retry};
use crate::event::ProcessId;
use crate::http::{RawResponse, RequestOptions};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type VerifyFn = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, Error>> + Send + Sync>;
type RecoveryFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;
type OptionsFn =
    Arc<dyn Fn(RequestOptions) -> BoxFuture<'static, Result<RequestOptions, Error>> + Send + Sync>;
type ResponseFn =
    Arc<dyn Fn(RawResponse) -> BoxFuture<'static, Result<RawResponse, Error>> + Send + Sync>;
type WatchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;
type ProcessFn = Arc<dyn Fn(ProcessId) + Send + Sync>;
type HandlerFn = Arc<dyn Fn(&Error) + Send + Sync>;

/// Identifier issued for every registered interceptor watch.
///
/// Carried on a [`Retry`] as its affinity token so the controller can drop
/// exactly the watch that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
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

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

fn recovery_fn<F, Fut>(recovery: F) -> RecoveryFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move || recovery().boxed())
}

/// Turn a tagged failure into a terminal error or, with a recovery
/// configured, into a retry.
fn raise(failure: Error, recovery: Option<&RecoveryFn>) -> Rejection {
    match recovery {
        Some(recovery) => Rejection::Retry(Retry::new(recovery(), failure)),
        None => Rejection::Error(failure),
    }
}

/// Side effect run when a logical send starts.
#[derive(Clone)]
pub struct OnStart {
    callback: ProcessFn,
}

impl OnStart {
    /// Create the operator.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProcessId) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Run the callback.
    pub fn middleware(&self, process: ProcessId) {
        (self.callback)(process);
    }
}

/// Pre-attempt gate.
///
/// Resolving `true` lets the attempt proceed; resolving `false` or failing
/// aborts it with [`ErrorKind::GuardRejected`], or raises a retry when a
/// recovery action is configured.
///
/// # Example
///
/// ```
/// use requester_core::operator::Guard;
///
/// let authenticated = Guard::new(|| async { Ok(true) });
/// let feature_flag = Guard::allow_if(|| std::env::var("OFFLINE").is_err());
/// ```
#[derive(Clone)]
pub struct Guard {
    verifier: VerifyFn,
    recovery: Option<RecoveryFn>,
}

impl Guard {
    /// Create a guard from an async verifier.
    pub fn new<F, Fut>(verifier: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, Error>> + Send + 'static,
    {
        Self {
            verifier: Arc::new(move || verifier().boxed()),
            recovery: None,
        }
    }

    /// Create a guard from a synchronous predicate.
    pub fn allow_if<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::new(move || future::ready(Ok(predicate())))
    }

    /// Retry the whole cycle after `recovery` resolves instead of failing.
    #[must_use]
    pub fn retry_with<F, Fut>(mut self, recovery: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.recovery = Some(recovery_fn(recovery));
        self
    }

    /// Evaluate the guard.
    pub fn middleware(&self) -> BoxFuture<'static, Result<(), Rejection>> {
        let verdict = (self.verifier)();
        let recovery = self.recovery.clone();
        async move {
            let failure = match verdict.await {
                Ok(true) => return Ok(()),
                Ok(false) => Error::new(ErrorKind::GuardRejected, "guard resolved false"),
                Err(error) => error.tagged_or(ErrorKind::GuardRejected),
            };
            Err(raise(failure, recovery.as_ref()))
        }
        .boxed()
    }
}

/// Transform of the outbound request options.
///
/// Pre-request operators run strictly in registration order, each receiving
/// the previous one's output.
#[derive(Clone)]
pub struct PreRequest {
    modifier: OptionsFn,
    recovery: Option<RecoveryFn>,
}

impl PreRequest {
    /// Create the operator from an async modifier.
    pub fn new<F, Fut>(modifier: F) -> Self
    where
        F: Fn(RequestOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestOptions, Error>> + Send + 'static,
    {
        Self {
            modifier: Arc::new(move |options| modifier(options).boxed()),
            recovery: None,
        }
    }

    /// Create the operator from an infallible synchronous modifier.
    pub fn map<F>(modifier: F) -> Self
    where
        F: Fn(RequestOptions) -> RequestOptions + Send + Sync + 'static,
    {
        Self::new(move |options| future::ready(Ok(modifier(options))))
    }

    /// Retry the whole cycle after `recovery` resolves instead of failing.
    #[must_use]
    pub fn retry_with<F, Fut>(mut self, recovery: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.recovery = Some(recovery_fn(recovery));
        self
    }

    /// Apply the modifier.
    pub fn middleware(
        &self,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<RequestOptions, Rejection>> {
        let modified = (self.modifier)(options);
        let recovery = self.recovery.clone();
        async move {
            modified.await.map_err(|error| {
                raise(error.tagged_or(ErrorKind::PreRequestFailed), recovery.as_ref())
            })
        }
        .boxed()
    }
}

/// Concurrent watcher that can abort or restart the in-flight attempt.
///
/// The watch closure is started for a cycle and raced against the attempt:
/// resolving `Err(error)` intercepts the attempt with that error (or with a
/// retry when a recovery is configured); resolving `Ok(())` means the watch
/// stood down and it never fires for that cycle.
///
/// A persistent interceptor keeps its pending watch across restarts caused
/// by other operators; a temporary one gets a fresh watch every cycle.
///
/// # Example
///
/// ```
/// use requester_core::error::Error;
/// use requester_core::operator::Interceptor;
/// use std::time::Duration;
///
/// let deadline = Interceptor::new(|| async {
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     Err(Error::custom("deadline exceeded"))
/// });
/// ```
#[derive(Clone)]
pub struct Interceptor {
    watch: WatchFn,
    recovery: Option<RecoveryFn>,
    persistent: bool,
}

impl Interceptor {
    /// Create a temporary interceptor.
    pub fn new<F, Fut>(watch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            watch: Arc::new(move || watch().boxed()),
            recovery: None,
            persistent: false,
        }
    }

    /// Keep the pending watch alive across restarts it did not cause.
    #[must_use]
    pub const fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Whether the watch survives foreign restarts.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Restart the whole cycle after `recovery` resolves instead of failing.
    #[must_use]
    pub fn retry_with<F, Fut>(mut self, recovery: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.recovery = Some(recovery_fn(recovery));
        self
    }

    /// Start a watch.
    ///
    /// The returned future only resolves when the watch intercepts; a watch
    /// that stands down stays pending until dropped.
    pub fn middleware(&self) -> BoxFuture<'static, Rejection> {
        let watch = (self.watch)();
        let recovery = self.recovery.clone();
        async move {
            match watch.await {
                Err(error) => raise(error.tagged_or(ErrorKind::Intercepted), recovery.as_ref()),
                Ok(()) => future::pending().await,
            }
        }
        .boxed()
    }
}

/// Transform of the received response.
///
/// Post-request operators run strictly in registration order, each receiving
/// the previous one's output.
#[derive(Clone)]
pub struct PostRequest {
    modifier: ResponseFn,
    recovery: Option<RecoveryFn>,
}

impl PostRequest {
    /// Create the operator from an async modifier.
    pub fn new<F, Fut>(modifier: F) -> Self
    where
        F: Fn(RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RawResponse, Error>> + Send + 'static,
    {
        Self {
            modifier: Arc::new(move |response| modifier(response).boxed()),
            recovery: None,
        }
    }

    /// Create the operator from an infallible synchronous modifier.
    pub fn map<F>(modifier: F) -> Self
    where
        F: Fn(RawResponse) -> RawResponse + Send + Sync + 'static,
    {
        Self::new(move |response| future::ready(Ok(modifier(response))))
    }

    /// Retry the whole cycle after `recovery` resolves instead of failing.
    #[must_use]
    pub fn retry_with<F, Fut>(mut self, recovery: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.recovery = Some(recovery_fn(recovery));
        self
    }

    /// Apply the modifier.
    pub fn middleware(
        &self,
        response: RawResponse,
    ) -> BoxFuture<'static, Result<RawResponse, Rejection>> {
        let modified = (self.modifier)(response);
        let recovery = self.recovery.clone();
        async move {
            modified.await.map_err(|error| {
                raise(error.tagged_or(ErrorKind::PostRequestFailed), recovery.as_ref())
            })
        }
        .boxed()
    }
}

/// Side effect run with the terminal error of a logical send.
#[derive(Clone)]
pub struct ErrorHandler {
    handler: HandlerFn,
}

impl ErrorHandler {
    /// Create the operator.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Run the handler.
    pub fn middleware(&self, error: &Error) {
        (self.handler)(error);
    }
}

/// Side effect run when a logical send ends, successfully or not.
#[derive(Clone)]
pub struct OnEnd {
    callback: ProcessFn,
}

impl OnEnd {
    /// Create the operator.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProcessId) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Run the callback.
    pub fn middleware(&self, process: ProcessId) {
        (self.callback)(process);
    }
}

/// Category of an [`Operator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    /// [`OnStart`]
    OnStart,
    /// [`Guard`]
    Guard,
    /// [`PreRequest`]
    PreRequest,
    /// [`Interceptor`]
    Interceptor,
    /// [`PostRequest`]
    PostRequest,
    /// [`ErrorHandler`]
    ErrorHandler,
    /// [`OnEnd`]
    OnEnd,
}

/// Any operator, as stored on a descriptor.
#[derive(Clone)]
pub enum Operator {
    /// Start-of-send side effect
    OnStart(OnStart),
    /// Pre-attempt gate
    Guard(Guard),
    /// Request options transform
    PreRequest(PreRequest),
    /// Concurrent watcher
    Interceptor(Interceptor),
    /// Response transform
    PostRequest(PostRequest),
    /// Terminal error side effect
    ErrorHandler(ErrorHandler),
    /// End-of-send side effect
    OnEnd(OnEnd),
}

impl Operator {
    /// Category of the operator.
    #[must_use]
    pub const fn kind(&self) -> OperatorKind {
        match self {
            Self::OnStart(_) => OperatorKind::OnStart,
            Self::Guard(_) => OperatorKind::Guard,
            Self::PreRequest(_) => OperatorKind::PreRequest,
            Self::Interceptor(_) => OperatorKind::Interceptor,
            Self::PostRequest(_) => OperatorKind::PostRequest,
            Self::ErrorHandler(_) => OperatorKind::ErrorHandler,
            Self::OnEnd(_) => OperatorKind::OnEnd,
        }
    }

    /// `true` when both handles share the same underlying closure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::OnStart(a), Self::OnStart(b)) => Arc::ptr_eq(&a.callback, &b.callback),
            (Self::Guard(a), Self::Guard(b)) => Arc::ptr_eq(&a.verifier, &b.verifier),
            (Self::PreRequest(a), Self::PreRequest(b)) => Arc::ptr_eq(&a.modifier, &b.modifier),
            (Self::Interceptor(a), Self::Interceptor(b)) => Arc::ptr_eq(&a.watch, &b.watch),
            (Self::PostRequest(a), Self::PostRequest(b)) => Arc::ptr_eq(&a.modifier, &b.modifier),
            (Self::ErrorHandler(a), Self::ErrorHandler(b)) => Arc::ptr_eq(&a.handler, &b.handler),
            (Self::OnEnd(a), Self::OnEnd(b)) => Arc::ptr_eq(&a.callback, &b.callback),
            _ => false,
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interceptor(interceptor) => f
                .debug_struct("Operator::Interceptor")
                .field("persistent", &interceptor.persistent)
                .field("retries", &interceptor.recovery.is_some())
                .finish(),
            other => write!(f, "Operator::{:?}", other.kind()),
        }
    }
}

impl From<OnStart> for Operator {
    fn from(op: OnStart) -> Self {
        Self::OnStart(op)
    }
}

impl From<Guard> for Operator {
    fn from(op: Guard) -> Self {
        Self::Guard(op)
    }
}

impl From<PreRequest> for Operator {
    fn from(op: PreRequest) -> Self {
        Self::PreRequest(op)
    }
}

impl From<Interceptor> for Operator {
    fn from(op: Interceptor) -> Self {
        Self::Interceptor(op)
    }
}

impl From<PostRequest> for Operator {
    fn from(op: PostRequest) -> Self {
        Self::PostRequest(op)
    }
}

impl From<ErrorHandler> for Operator {
    fn from(op: ErrorHandler) -> Self {
        Self::ErrorHandler(op)
    }
}

impl From<OnEnd> for Operator {
    fn from(op: OnEnd) -> Self {
        Self::OnEnd(op)
    }
}

/// Operators of one logical send, split by phase.
///
/// Registration order is preserved within every phase.
#[derive(Clone, Default)]
pub struct Pipeline {
    /// Start-of-send side effects
    pub on_start: Vec<OnStart>,
    /// Pre-attempt gates
    pub guards: Vec<Guard>,
    /// Request options transforms
    pub pre_request: Vec<PreRequest>,
    /// Concurrent watchers
    pub interceptors: Vec<Interceptor>,
    /// Response transforms
    pub post_request: Vec<PostRequest>,
    /// Terminal error side effects
    pub error_handlers: Vec<ErrorHandler>,
    /// End-of-send side effects
    pub on_end: Vec<OnEnd>,
}

impl Pipeline {
    /// Split an ordered operator list by phase.
    #[must_use]
    pub fn new(operators: impl IntoIterator<Item = Operator>) -> Self {
        operators
            .into_iter()
            .fold(Self::default(), |mut pipeline, operator| {
                match operator {
                    Operator::OnStart(op) => pipeline.on_start.push(op),
                    Operator::Guard(op) => pipeline.guards.push(op),
                    Operator::PreRequest(op) => pipeline.pre_request.push(op),
                    Operator::Interceptor(op) => pipeline.interceptors.push(op),
                    Operator::PostRequest(op) => pipeline.post_request.push(op),
                    Operator::ErrorHandler(op) => pipeline.error_handlers.push(op),
                    Operator::OnEnd(op) => pipeline.on_end.push(op),
                }
                pipeline
            })
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("on_start", &self.on_start.len())
            .field("guards", &self.guards.len())
            .field("pre_request", &self.pre_request.len())
            .field("interceptors", &self.interceptors.len())
            .field("post_request", &self.post_request.len())
            .field("error_handlers", &self.error_handlers.len())
            .field("on_end", &self.on_end.len())
            .finish()
    }
}
