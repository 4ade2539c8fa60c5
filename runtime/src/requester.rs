//! Fluent request builder and `send` entry point.

use crate::config::RequesterConfig;
use crate::controller::Controller;
use crate::error::ConfigError;
use crate::hub::{EventStream, Hub};
use requester_core::descriptor::Descriptor;
use requester_core::environment::{Clock, SystemClock};
use requester_core::event::{EventKind, LifecycleEvent, ProcessId};
use requester_core::http::{Body, Method, MultiMap, ResponseType};
use requester_core::operator::{Operator, Pipeline};
use requester_core::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Several scalar overrides applied at once by [`Requester::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestPatch {
    /// New host
    pub host: Option<String>,
    /// New path
    pub url: Option<String>,
    /// New verb
    pub method: Option<Method>,
    /// New response encoding
    pub response_type: Option<ResponseType>,
}

impl RequestPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the path.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the verb.
    #[must_use]
    pub const fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the response encoding.
    #[must_use]
    pub const fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }
}

/// Per-call options of the verb shortcuts.
///
/// Headers and params are appended to the inherited ones; body and response
/// encoding replace them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Request payload
    pub body: Option<Body>,
    /// Extra headers
    pub headers: MultiMap,
    /// Extra query parameters
    pub params: MultiMap,
    /// Response encoding
    pub response_type: Option<ResponseType>,
}

impl SendOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = self.headers.append(key, value);
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params = self.params.append(key, value);
        self
    }

    /// Set the response encoding.
    #[must_use]
    pub const fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }
}

/// Dependencies shared by every descriptor derived from one requester.
struct Engine {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: RequesterConfig,
    next_process: AtomicU64,
}

/// Handle pairing an immutable [`Descriptor`] with the engine that sends it.
///
/// Every builder method returns a new handle on a new descriptor leaf; the
/// receiver is never modified. [`Clone`] likewise creates a fresh leaf with
/// no overrides, so writes on a clone never reach its source.
///
/// # Example
///
/// ```no_run
/// use requester_core::operator::PreRequest;
/// use requester_core::transport::Transport;
/// use requester_runtime::Requester;
/// use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn Transport>) -> Result<(), requester_core::Error> {
/// let api = Requester::new(transport)
///     .set_host("https://api.example.com")
///     .add_operator(PreRequest::map(|o| o.with_header("authorization", "Bearer t")));
///
/// let users = api.get("/users", None).await?;
/// # Ok(())
/// # }
/// ```
pub struct Requester {
    descriptor: Arc<Descriptor>,
    engine: Arc<Engine>,
}

impl Requester {
    /// Create a requester with the default configuration and system clock.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_environment(transport, Arc::new(SystemClock), RequesterConfig::default())
    }

    /// Create a requester with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns the error from [`RequesterConfig::validate`].
    pub fn with_config(
        transport: Arc<dyn Transport>,
        config: RequesterConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_environment(transport, Arc::new(SystemClock), config))
    }

    /// Create a requester with every dependency injected.
    #[must_use]
    pub fn with_environment(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: RequesterConfig,
    ) -> Self {
        Self {
            descriptor: Descriptor::root(),
            engine: Arc::new(Engine {
                transport,
                clock,
                config,
                next_process: AtomicU64::new(1),
            }),
        }
    }

    fn derive(&self, descriptor: Arc<Descriptor>) -> Self {
        Self {
            descriptor,
            engine: Arc::clone(&self.engine),
        }
    }

    /// The descriptor this handle sends.
    #[must_use]
    pub const fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RequesterConfig {
        &self.engine.config
    }

    /// Override the host.
    #[must_use]
    pub fn set_host(&self, host: impl Into<String>) -> Self {
        self.derive(self.descriptor.with_host(host))
    }

    /// Override the path.
    #[must_use]
    pub fn set_url(&self, path: impl Into<String>) -> Self {
        self.derive(self.descriptor.with_path(path))
    }

    /// Override the verb.
    #[must_use]
    pub fn set_method(&self, method: Method) -> Self {
        self.derive(self.descriptor.with_method(method))
    }

    /// Override the body.
    #[must_use]
    pub fn set_body(&self, body: impl Into<Body>) -> Self {
        self.derive(self.descriptor.with_body(body))
    }

    /// Override the desired response encoding.
    #[must_use]
    pub fn set_response_type(&self, response_type: ResponseType) -> Self {
        self.derive(self.descriptor.with_response_type(response_type))
    }

    /// Apply every override present in the patch.
    #[must_use]
    pub fn set(&self, patch: RequestPatch) -> Self {
        let mut descriptor = self.descriptor.child();
        if let Some(host) = patch.host {
            descriptor = descriptor.with_host(host);
        }
        if let Some(url) = patch.url {
            descriptor = descriptor.with_path(url);
        }
        if let Some(method) = patch.method {
            descriptor = descriptor.with_method(method);
        }
        if let Some(response_type) = patch.response_type {
            descriptor = descriptor.with_response_type(response_type);
        }
        self.derive(descriptor)
    }

    /// Append one operator after every inherited one.
    #[must_use]
    pub fn add_operator(&self, operator: impl Into<Operator>) -> Self {
        self.derive(self.descriptor.with_operators([operator.into()]))
    }

    /// Append operators after every inherited one, in order.
    #[must_use]
    pub fn add_operators(&self, operators: impl IntoIterator<Item = Operator>) -> Self {
        self.derive(self.descriptor.with_operators(operators))
    }

    /// Replace the effective operator list.
    ///
    /// Operators added to ancestors afterwards are not inherited through the
    /// returned handle.
    #[must_use]
    pub fn set_operators(&self, operators: impl IntoIterator<Item = Operator>) -> Self {
        self.derive(self.descriptor.with_replaced_operators(operators))
    }

    /// Replace the effective operator list with a function of it.
    #[must_use]
    pub fn modify_operators<F>(&self, modify: F) -> Self
    where
        F: FnOnce(Vec<Operator>) -> Vec<Operator>,
    {
        self.set_operators(modify(self.descriptor.operators()))
    }

    /// Invoke `listener` synchronously for every event of `kind`.
    #[must_use]
    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.derive(self.descriptor.with_listener(kind, Arc::new(listener)))
    }

    /// Replace the headers with a function of the effective ones.
    #[must_use]
    pub fn configure_headers<F>(&self, configure: F) -> Self
    where
        F: FnOnce(MultiMap) -> MultiMap,
    {
        let headers = configure(self.descriptor.headers());
        self.derive(self.descriptor.with_headers(headers))
    }

    /// Replace the query parameters with a function of the effective ones.
    #[must_use]
    pub fn configure_params<F>(&self, configure: F) -> Self
    where
        F: FnOnce(MultiMap) -> MultiMap,
    {
        let params = configure(self.descriptor.params());
        self.derive(self.descriptor.with_params(params))
    }

    /// Start a logical send of this descriptor.
    ///
    /// The send runs on its own task and proceeds whether or not the returned
    /// stream is polled; dropping every handle of the stream cancels it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[tracing::instrument(skip(self), level = "debug", fields(url = %self.descriptor.url()))]
    pub fn send(&self) -> EventStream {
        let process_id = ProcessId::new(self.engine.next_process.fetch_add(1, Ordering::Relaxed));
        let config = &self.engine.config;

        let hub = Arc::new(Hub::new(
            process_id,
            Arc::clone(&self.engine.clock),
            self.descriptor.listeners(),
            config.event_buffer,
        ));
        let (trigger, cancelled) = tokio::sync::watch::channel(false);
        let stream = EventStream::new(Arc::clone(&hub), trigger);

        let controller = Controller::new(
            process_id,
            Pipeline::new(self.descriptor.operators()),
            self.descriptor.request_options(config.default_response_type),
            Arc::clone(&self.engine.transport),
            hub,
            config.max_restarts,
        );
        tracing::debug!(process = %process_id, "Spawning send");
        tokio::spawn(controller.drive(cancelled));

        stream
    }

    /// Send `path` with `method`, applying optional per-call options.
    pub fn request(
        &self,
        method: Method,
        path: impl Into<String>,
        options: Option<SendOptions>,
    ) -> EventStream {
        let mut descriptor = self.descriptor.with_method(method).with_path(path);
        if let Some(options) = options {
            if let Some(body) = options.body {
                descriptor = descriptor.with_body(body);
            }
            if !options.headers.is_empty() {
                let headers = descriptor.headers().merge(&options.headers);
                descriptor = descriptor.with_headers(headers);
            }
            if !options.params.is_empty() {
                let params = descriptor.params().merge(&options.params);
                descriptor = descriptor.with_params(params);
            }
            if let Some(response_type) = options.response_type {
                descriptor = descriptor.with_response_type(response_type);
            }
        }
        self.derive(descriptor).send()
    }

    /// `GET path`.
    pub fn get(&self, path: impl Into<String>, options: Option<SendOptions>) -> EventStream {
        self.request(Method::Get, path, options)
    }

    /// `POST path`.
    pub fn post(&self, path: impl Into<String>, options: Option<SendOptions>) -> EventStream {
        self.request(Method::Post, path, options)
    }

    /// `PUT path`.
    pub fn put(&self, path: impl Into<String>, options: Option<SendOptions>) -> EventStream {
        self.request(Method::Put, path, options)
    }

    /// `PATCH path`.
    pub fn patch(&self, path: impl Into<String>, options: Option<SendOptions>) -> EventStream {
        self.request(Method::Patch, path, options)
    }

    /// `DELETE path`.
    pub fn delete(&self, path: impl Into<String>, options: Option<SendOptions>) -> EventStream {
        self.request(Method::Delete, path, options)
    }
}

impl Clone for Requester {
    fn clone(&self) -> Self {
        self.derive(self.descriptor.child())
    }
}

impl fmt::Debug for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requester")
            .field("descriptor", &self.descriptor)
            .field("config", &self.engine.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use requester_core::transport::TransportStream;

    struct Unreachable;

    impl Transport for Unreachable {
        fn execute(&self, _request: requester_core::http::RequestOptions) -> TransportStream {
            stream::pending().boxed()
        }
    }

    fn requester() -> Requester {
        Requester::new(Arc::new(Unreachable))
    }

    #[test]
    fn test_builders_never_modify_the_receiver() {
        let base = requester().set_host("https://a.test").set_url("/one");
        let changed = base.set_url("/two").set_method(Method::Put);

        assert_eq!(base.descriptor().url(), "https://a.test/one");
        assert_eq!(base.descriptor().method(), Method::Get);
        assert_eq!(changed.descriptor().url(), "https://a.test/two");
        assert_eq!(changed.descriptor().method(), Method::Put);
    }

    #[test]
    fn test_clone_is_a_new_leaf() {
        let base = requester().set_host("https://a.test");
        let clone = base.clone();

        assert!(clone
            .descriptor()
            .ancestor()
            .is_some_and(|ancestor| Arc::ptr_eq(ancestor, base.descriptor())));
        assert_eq!(clone.descriptor().url(), base.descriptor().url());
    }

    #[test]
    fn test_set_applies_patch() {
        let patched = requester().set(
            RequestPatch::new()
                .host("https://b.test")
                .url("items")
                .method(Method::Delete)
                .response_type(ResponseType::Text),
        );
        let descriptor = patched.descriptor();

        assert_eq!(descriptor.url(), "https://b.test/items");
        assert_eq!(descriptor.method(), Method::Delete);
        assert_eq!(descriptor.response_type(), Some(ResponseType::Text));
    }

    #[test]
    fn test_configure_headers_sees_inherited_values() {
        let base = requester().configure_headers(|h| h.append("accept", "json"));
        let child = base.configure_headers(|h| h.append("x-trace", "1"));

        assert_eq!(base.descriptor().headers().len(), 1);
        assert_eq!(child.descriptor().headers().get("accept"), Some("json"));
        assert_eq!(child.descriptor().headers().get("x-trace"), Some("1"));
    }

    #[test]
    fn test_patch_deserializes_camel_case() {
        let patch: RequestPatch =
            serde_json::from_str(r#"{ "url": "/x", "responseType": "text" }"#).unwrap_or_default();
        assert_eq!(patch.url.as_deref(), Some("/x"));
        assert_eq!(patch.response_type, Some(ResponseType::Text));
        assert_eq!(patch.host, None);
    }
}
