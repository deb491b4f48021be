// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blocking HTTP transport for the stratus control-plane client.
//!
//! Requests and responses are plain data ([`HttpRequest`], [`HttpResponse`],
//! [`StreamingResponse`]) so that callers never depend on a specific HTTP
//! library. The [`HttpTransport`] trait is the seam between the client and the
//! network; [`UreqTransport`] is the production implementation.
//!
//! Status codes are never turned into errors here. A 404 or a 500 is a
//! successfully transported response; mapping it onto a failure category is
//! the caller's job.

mod transport;

pub use transport::{TransportConfig, UreqTransport};

use std::fmt;
use std::io::Read;

use thiserror::Error;

/// Errors raised while moving bytes, before any status code is known.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The connection could not be established (DNS, refused, unreachable).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// An I/O failure on an established connection (reset, timeout).
    #[error("i/o error: {0}")]
    Io(String),

    /// Reading the response body failed.
    #[error("body read failed: {0}")]
    Body(#[from] std::io::Error),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// Follow 3xx responses. When false, a redirect is returned to the caller.
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            follow_redirects: true,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body has not been read yet.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Box<dyn Read + Send>,
}

impl StreamingResponse {
    /// Read the whole body into memory.
    pub fn into_buffered(mut self) -> Result<HttpResponse, HttpError> {
        let mut body = Vec::new();
        self.body.read_to_end(&mut body)?;
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers,
            body,
        })
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Moves a request over the network and hands back the response.
pub trait HttpTransport: Send + Sync {
    /// Send a request and return the response with an unread body.
    fn send(&self, request: &HttpRequest) -> Result<StreamingResponse, HttpError>;

    /// Send a request and buffer the whole response body.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        self.send(request)?.into_buffered()
    }
}

impl<T: HttpTransport + ?Sized> HttpTransport for Box<T> {
    fn send(&self, request: &HttpRequest) -> Result<StreamingResponse, HttpError> {
        (**self).send(request)
    }
}

impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    fn send(&self, request: &HttpRequest) -> Result<StreamingResponse, HttpError> {
        (**self).send(request)
    }
}

/// Value for a `Range` header covering `len` bytes from `offset`, or the
/// rest of the resource when `len` is `None`.
pub fn range_header(offset: u64, len: Option<u64>) -> String {
    match len {
        Some(0) | None => format!("bytes={}-", offset),
        Some(len) => format!("bytes={}-{}", offset, offset + len - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Location", "http://other:13000");
        assert_eq!(headers.get("location"), Some("http://other:13000"));
        assert_eq!(headers.get("LOCATION"), Some("http://other:13000"));
        assert_eq!(headers.get("content-type"), None);
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::new(Method::Post, "http://localhost/upload")
            .with_header("Content-Type", "application/octet-stream")
            .with_body(vec![1, 2, 3])
            .without_redirects();
        assert_eq!(req.method.as_str(), "POST");
        assert_eq!(req.body.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(!req.follow_redirects);
        assert_eq!(
            req.headers.get("content-type"),
            Some("application/octet-stream")
        );
    }

    #[test]
    fn test_streaming_into_buffered() {
        let resp = StreamingResponse {
            status: 200,
            headers: Headers::new(),
            body: Box::new(Cursor::new(b"hello".to_vec())),
        };
        let buffered = resp.into_buffered().unwrap();
        assert_eq!(buffered.status, 200);
        assert_eq!(buffered.text(), "hello");
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, None), "bytes=0-");
        assert_eq!(range_header(100, None), "bytes=100-");
        assert_eq!(range_header(0, Some(512)), "bytes=0-511");
        assert_eq!(range_header(1024, Some(1024)), "bytes=1024-2047");
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert_eq!(format!("{}", Method::Put), "PUT");
    }
}
