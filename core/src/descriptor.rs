//! Immutable request configuration with ancestor fallback.
//!
//! A [`Descriptor`] is a node in a tree. Scalar fields not set on a node are
//! read from its ancestor, recursively up to the root, then fall back to a
//! default. Operators and listeners are combined instead: reading them yields
//! every ancestor's entries followed by the node's own.
//!
//! Descriptors are shared behind [`Arc`] and never change once built. Every
//! `with_*` method returns a new leaf whose ancestor is the receiver.
//!
//! # Example
//!
//! ```
//! use requester_core::descriptor::Descriptor;
//! use requester_core::http::Method;
//!
//! let api = Descriptor::root().with_host("https://api.example.com");
//! let users = api.with_path("/users").with_method(Method::Post);
//!
//! assert_eq!(users.url(), "https://api.example.com/users");
//! assert_eq!(api.url(), "https://api.example.com/");
//! assert_eq!(api.method(), Method::Get);
//! ```

use crate::event::{EventKind, LifecycleEvent};
use crate::http::{join_url, Body, Method, MultiMap, RequestOptions, ResponseType};
use crate::operator::Operator;
use std::fmt;
use std::sync::Arc;

/// Callback invoked synchronously for every event of one kind.
pub type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

const DEFAULT_PATH: &str = "/";

/// One immutable request configuration node.
#[derive(Default)]
pub struct Descriptor {
    ancestor: Option<Arc<Descriptor>>,
    method: Option<Method>,
    host: Option<String>,
    path: Option<String>,
    body: Option<Body>,
    headers: Option<MultiMap>,
    params: Option<MultiMap>,
    response_type: Option<ResponseType>,
    operators: Vec<Operator>,
    operators_replaced: bool,
    listeners: Vec<(EventKind, Listener)>,
}

impl Descriptor {
    /// A descriptor with no ancestor and no overrides.
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A new leaf with no own overrides, observationally identical to `self`.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        self.derive(|_| {})
    }

    /// Build a new leaf, shadowing fields before it is published.
    fn derive(self: &Arc<Self>, shadow: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut node = Self {
            ancestor: Some(Arc::clone(self)),
            ..Self::default()
        };
        shadow(&mut node);
        Arc::new(node)
    }

    /// The node this one falls back to.
    #[must_use]
    pub const fn ancestor(&self) -> Option<&Arc<Self>> {
        self.ancestor.as_ref()
    }

    /// Number of ancestors above this node.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lineage().count() - 1
    }

    /// This node, then every ancestor up to the root.
    fn lineage(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |node| node.ancestor.as_deref())
    }

    fn lookup<'a, T: ?Sized + 'a>(
        &'a self,
        field: impl Fn(&'a Self) -> Option<&'a T>,
    ) -> Option<&'a T> {
        self.lineage().find_map(field)
    }

    /// Override the verb.
    #[must_use]
    pub fn with_method(self: &Arc<Self>, method: Method) -> Arc<Self> {
        self.derive(|node| node.method = Some(method))
    }

    /// Override the host.
    #[must_use]
    pub fn with_host(self: &Arc<Self>, host: impl Into<String>) -> Arc<Self> {
        let host = host.into();
        self.derive(|node| node.host = Some(host))
    }

    /// Override the path.
    #[must_use]
    pub fn with_path(self: &Arc<Self>, path: impl Into<String>) -> Arc<Self> {
        let path = path.into();
        self.derive(|node| node.path = Some(path))
    }

    /// Override the body.
    #[must_use]
    pub fn with_body(self: &Arc<Self>, body: impl Into<Body>) -> Arc<Self> {
        let body = body.into();
        self.derive(|node| node.body = Some(body))
    }

    /// Override the headers.
    #[must_use]
    pub fn with_headers(self: &Arc<Self>, headers: MultiMap) -> Arc<Self> {
        self.derive(|node| node.headers = Some(headers))
    }

    /// Override the query parameters.
    #[must_use]
    pub fn with_params(self: &Arc<Self>, params: MultiMap) -> Arc<Self> {
        self.derive(|node| node.params = Some(params))
    }

    /// Override the desired response encoding.
    #[must_use]
    pub fn with_response_type(self: &Arc<Self>, response_type: ResponseType) -> Arc<Self> {
        self.derive(|node| node.response_type = Some(response_type))
    }

    /// Append operators after every inherited one.
    #[must_use]
    pub fn with_operators(self: &Arc<Self>, operators: impl IntoIterator<Item = Operator>) -> Arc<Self> {
        let operators = operators.into_iter().collect();
        self.derive(|node| node.operators = operators)
    }

    /// Replace the effective operator list; ancestors' operators are no
    /// longer inherited through the new node.
    #[must_use]
    pub fn with_replaced_operators(
        self: &Arc<Self>,
        operators: impl IntoIterator<Item = Operator>,
    ) -> Arc<Self> {
        let operators = operators.into_iter().collect();
        self.derive(|node| {
            node.operators = operators;
            node.operators_replaced = true;
        })
    }

    /// Register a listener after every inherited one.
    #[must_use]
    pub fn with_listener(self: &Arc<Self>, kind: EventKind, listener: Listener) -> Arc<Self> {
        self.derive(|node| node.listeners.push((kind, listener)))
    }

    /// Effective verb, `GET` by default.
    #[must_use]
    pub fn method(&self) -> Method {
        self.lookup(|node| node.method.as_ref())
            .copied()
            .unwrap_or_default()
    }

    /// Effective host, empty by default.
    #[must_use]
    pub fn host(&self) -> &str {
        self.lookup(|node| node.host.as_deref()).unwrap_or_default()
    }

    /// Effective path, `/` by default.
    #[must_use]
    pub fn path(&self) -> &str {
        self.lookup(|node| node.path.as_deref())
            .unwrap_or(DEFAULT_PATH)
    }

    /// Absolute URL from the effective host and path.
    #[must_use]
    pub fn url(&self) -> String {
        join_url(self.host(), self.path())
    }

    /// Effective body, empty by default.
    #[must_use]
    pub fn body(&self) -> Body {
        self.lookup(|node| node.body.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Effective headers, empty by default.
    #[must_use]
    pub fn headers(&self) -> MultiMap {
        self.lookup(|node| node.headers.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Effective query parameters, empty by default.
    #[must_use]
    pub fn params(&self) -> MultiMap {
        self.lookup(|node| node.params.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Effective response encoding, if any node in the lineage sets one.
    #[must_use]
    pub fn response_type(&self) -> Option<ResponseType> {
        self.lookup(|node| node.response_type.as_ref()).copied()
    }

    /// Combined operators, ancestors first.
    ///
    /// Inheritance stops at the nearest node whose operators were replaced.
    #[must_use]
    pub fn operators(&self) -> Vec<Operator> {
        let mut chain = Vec::new();
        for node in self.lineage() {
            chain.push(node);
            if node.operators_replaced {
                break;
            }
        }
        chain
            .into_iter()
            .rev()
            .flat_map(|node| node.operators.iter().cloned())
            .collect()
    }

    /// Combined listeners, ancestors first.
    #[must_use]
    pub fn listeners(&self) -> Vec<(EventKind, Listener)> {
        let mut chain: Vec<&Self> = self.lineage().collect();
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|node| node.listeners.iter().cloned())
            .collect()
    }

    /// Snapshot of the effective request.
    #[must_use]
    pub fn request_options(&self, default_response_type: ResponseType) -> RequestOptions {
        RequestOptions {
            method: self.method(),
            url: self.url(),
            body: self.body(),
            headers: self.headers(),
            params: self.params(),
            response_type: self.response_type().unwrap_or(default_response_type),
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("depth", &self.depth())
            .field("method", &self.method())
            .field("url", &self.url())
            .field("operators", &self.operators().len())
            .field("listeners", &self.listeners().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{Guard, OnEnd, PreRequest};
    use proptest::prelude::*;

    fn noop_listener() -> Listener {
        Arc::new(|_| {})
    }

    #[test]
    fn test_defaults() {
        let root = Descriptor::root();
        assert_eq!(root.method(), Method::Get);
        assert_eq!(root.host(), "");
        assert_eq!(root.path(), "/");
        assert_eq!(root.url(), "/");
        assert!(root.body().is_empty());
        assert!(root.operators().is_empty());
        assert_eq!(root.depth(), 0);

        let options = root.request_options(ResponseType::Text);
        assert_eq!(options.response_type, ResponseType::Text);
    }

    #[test]
    fn test_child_is_observationally_identical() {
        let parent = Descriptor::root()
            .with_host("https://a.test")
            .with_path("/items")
            .with_headers(MultiMap::new().append("accept", "json"));
        let child = parent.child();

        assert_eq!(child.url(), parent.url());
        assert_eq!(child.headers(), parent.headers());
        assert!(child.ancestor().is_some_and(|a| Arc::ptr_eq(a, &parent)));
        assert_eq!(child.depth(), parent.depth() + 1);
    }

    #[test]
    fn test_replaced_operators_stop_inheritance() {
        let guard = Guard::allow_if(|| true);
        let root = Descriptor::root().with_operators([guard.into()]);
        let replaced = root.with_replaced_operators([OnEnd::new(|_| {}).into()]);
        let extended = replaced.with_operators([PreRequest::map(|o| o).into()]);

        assert_eq!(root.operators().len(), 1);
        assert_eq!(replaced.operators().len(), 1);
        assert_eq!(extended.operators().len(), 2);
        assert!(extended
            .operators()
            .iter()
            .all(|op| !matches!(op, Operator::Guard(_))));
    }

    #[test]
    fn test_listeners_are_combined_ancestor_first() {
        let first = noop_listener();
        let second = noop_listener();
        let root = Descriptor::root().with_listener(EventKind::Responded, Arc::clone(&first));
        let leaf = root
            .child()
            .with_listener(EventKind::ProcessFinished, Arc::clone(&second));

        let listeners = leaf.listeners();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].0, EventKind::Responded);
        assert!(Arc::ptr_eq(&listeners[0].1, &first));
        assert!(Arc::ptr_eq(&listeners[1].1, &second));
        assert_eq!(root.listeners().len(), 1);
    }

    fn method_strategy() -> impl Strategy<Value = Method> {
        prop_oneof![
            Just(Method::Get),
            Just(Method::Post),
            Just(Method::Put),
            Just(Method::Patch),
            Just(Method::Delete),
        ]
    }

    proptest! {
        #[test]
        fn prop_writes_on_child_never_reach_ancestor(
            host in "[a-z]{1,8}",
            path in "/[a-z]{0,8}",
            child_path in "/[a-z]{0,8}",
            method in method_strategy(),
            depth in 0usize..6,
        ) {
            let mut parent = Descriptor::root()
                .with_host(host.clone())
                .with_path(path.clone())
                .with_method(method);
            for _ in 0..depth {
                parent = parent.child();
            }

            let child = parent.child();
            prop_assert_eq!(child.url(), parent.url());
            prop_assert_eq!(child.method(), parent.method());

            let written = child.with_path(child_path.clone()).with_method(Method::Delete);
            prop_assert_eq!(written.path(), child_path.as_str());
            prop_assert_eq!(written.method(), Method::Delete);
            prop_assert_eq!(parent.path(), path.as_str());
            prop_assert_eq!(parent.method(), method);
            prop_assert_eq!(written.host(), host.as_str());
        }

        #[test]
        fn prop_operators_are_ancestor_then_own(levels in 1usize..8) {
            let mut node = Descriptor::root();
            let mut registered = Vec::new();
            for _ in 0..levels {
                let op: Operator = Guard::allow_if(|| true).into();
                registered.push(op.clone());
                node = node.with_operators([op]);
            }

            let combined = node.operators();
            prop_assert_eq!(combined.len(), registered.len());
            for (read, expected) in combined.iter().zip(&registered) {
                prop_assert!(read.ptr_eq(expected));
            }
        }
    }
}
