//! Request and response snapshots exchanged between the worker, its cache
//! partitions and the network.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

/// Body of the offline response synthesized for HTML navigations.
pub const OFFLINE_PAGE_TEXT: &str = "Offline - connect to the internet";

/// Body of the offline response synthesized for any other resource.
pub const OFFLINE_RESOURCE_TEXT: &str = "Resource not available offline";

/// Body returned when a bypassed request cannot reach its origin.
pub const UPSTREAM_UNREACHABLE_TEXT: &str = "Upstream unreachable";

/// Identity of a request inside a cache partition: method plus normalized URL.
///
/// Normalization drops the fragment, which never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Builds the key for `method` on `url`.
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Builds the key of a `GET` on `url`.
    #[must_use]
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the normalized URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl ShellRequest {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` request for `url`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Adds a header, replacing any previous value with the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the `Accept` header.
    #[must_use]
    pub fn with_accept(self, accept: &'static str) -> Self {
        self.with_header(ACCEPT, HeaderValue::from_static(accept))
    }

    /// Replaces all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the cache key of this request.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    /// Returns true when the `Accept` header asks for an HTML document.
    #[must_use]
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }
}

/// A full response snapshot: status, headers and body.
///
/// The body is reference-counted, so cloning a response to hand one copy to the
/// page and store the other is cheap and both copies stay byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ShellResponse {
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A `200 OK` response with no headers.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body.into())
    }

    /// A `text/plain` response with the given status.
    #[must_use]
    pub fn plain_text(status: StatusCode, text: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        Self::new(status, headers, Bytes::from_static(text.as_bytes()))
    }

    /// The `503` returned for an HTML navigation with nothing cached.
    #[must_use]
    pub fn offline_page() -> Self {
        Self::plain_text(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_PAGE_TEXT)
    }

    /// The `503` returned for any other uncached resource.
    #[must_use]
    pub fn offline_resource() -> Self {
        Self::plain_text(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_RESOURCE_TEXT)
    }

    /// The `502` returned when a pass-through request cannot reach its origin.
    #[must_use]
    pub fn upstream_unreachable() -> Self {
        Self::plain_text(StatusCode::BAD_GATEWAY, UPSTREAM_UNREACHABLE_TEXT)
    }

    /// Adds a header, replacing any previous value with the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the `Content-Type` header, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Only an exact `200` is ever written to a partition.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }
}
