//! HTTP value types shared by descriptors, operators and transports.
//!
//! These are plain values: the request snapshot handed to pre-request
//! operators and the transport ([`RequestOptions`]), the raw response handed
//! to post-request operators ([`RawResponse`]), and their building blocks.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    #[default]
    Get,
    /// `DELETE`
    Delete,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
}

impl Method {
    /// Upper-case wire name of the verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Delete => "DELETE",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for [`Method`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid request method: {0}")]
pub struct ParseMethodError(String);

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "DELETE" => Ok(Self::Delete),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// Desired response encoding, passed to the transport as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Raw bytes
    ArrayBuffer,
    /// Opaque binary blob
    Blob,
    /// JSON document
    #[default]
    Json,
    /// UTF-8 text
    Text,
}

/// Ordered multimap used for headers and query parameters.
///
/// Keys keep their first insertion order; each key holds one or more values.
///
/// # Example
///
/// ```
/// use requester_core::http::MultiMap;
///
/// let headers = MultiMap::new()
///     .append("accept", "application/json")
///     .append("accept", "text/plain")
///     .set("x-trace", "abc");
///
/// assert_eq!(headers.get("accept"), Some("application/json"));
/// assert_eq!(headers.get_all("accept").len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: Vec<(String, SmallVec<[String; 1]>)>,
}

impl MultiMap {
    /// Create an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Add a value, keeping existing values of the key.
    #[must_use]
    pub fn append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        match self.position(&key) {
            Some(index) => self.entries[index].1.push(value.into()),
            None => {
                let mut values = SmallVec::new();
                values.push(value.into());
                self.entries.push((key, values));
            },
        }
        self
    }

    /// Replace every value of the key with a single value.
    #[must_use]
    pub fn set(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.remove(&key).append(key, value)
    }

    /// Drop the key and all its values.
    #[must_use]
    pub fn remove(mut self, key: &str) -> Self {
        self.entries.retain(|(k, _)| k != key);
        self
    }

    /// Append every entry of `other`.
    #[must_use]
    pub fn merge(self, other: &Self) -> Self {
        other
            .iter()
            .fold(self, |map, (key, value)| map.append(key, value))
    }

    /// First value of the key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|index| self.entries[index].1.first())
            .map(String::as_str)
    }

    /// All values of the key (empty when absent).
    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.position(key)
            .map_or(&[] as &[String], |index| self.entries[index].1.as_slice())
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Every `(key, value)` pair, values of a key kept together.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no key is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request or response payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No payload
    #[default]
    Empty,
    /// Parsed JSON document
    Json(serde_json::Value),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Body {
    /// `true` for [`Body::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The JSON document, if this is a JSON body.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The text, if this is a text body.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Upload or download progress reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes transferred so far
    pub loaded: u64,
    /// Total bytes, when known
    pub total: Option<u64>,
}

impl Progress {
    /// Create a progress notification.
    #[must_use]
    pub const fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    /// Fraction transferred in `0.0..=1.0`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // byte counts stay well below 2^52
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.loaded as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Join a host and a path into an absolute URL.
///
/// With an empty host the path is returned unchanged; otherwise exactly one
/// `/` separates them.
#[must_use]
pub fn join_url(host: &str, path: &str) -> String {
    if host.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Snapshot of one outbound request.
///
/// Built from a descriptor at the start of every attempt, folded through
/// pre-request operators, then handed to the transport.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestOptions {
    /// Request verb
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request payload
    pub body: Body,
    /// Request headers
    pub headers: MultiMap,
    /// Query parameters
    pub params: MultiMap,
    /// Desired response encoding
    pub response_type: ResponseType,
}

impl RequestOptions {
    /// Create options for a verb and URL with everything else defaulted.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    /// Replace the URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing earlier values.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = self.headers.set(key, value);
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params = self.params.append(key, value);
        self
    }
}

/// Response as delivered by the transport.
///
/// Non-2xx statuses are ordinary responses, not failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// URL the response came from
    pub url: String,
    /// Response headers
    pub headers: MultiMap,
    /// Response payload
    pub body: Body,
}

impl RawResponse {
    /// Create a response with a status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Body>) -> Self {
        Self {
            status,
            status_text: String::new(),
            url: String::new(),
            headers: MultiMap::new(),
            body: body.into(),
        }
    }

    /// `200 OK` with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Body>) -> Self {
        Self::new(200, body).with_status_text("OK")
    }

    /// Replace the body, keeping everything else.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Replace the reason phrase.
    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Replace the source URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set a header, replacing earlier values.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = self.headers.set(key, value);
        self
    }

    /// `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Decode the body into `T`.
    ///
    /// JSON bodies are converted directly; text and byte bodies are parsed
    /// as JSON.
    ///
    /// # Errors
    ///
    /// Returns the decoding error when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            Body::Json(value) => T::deserialize(value),
            Body::Text(text) => serde_json::from_str(text),
            Body::Bytes(bytes) => serde_json::from_slice(bytes),
            Body::Empty => T::deserialize(&serde_json::Value::Null),
        }
    }
}
