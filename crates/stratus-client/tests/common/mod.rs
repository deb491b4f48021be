// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the integration tests: a scripted in-process transport
//! and a client wired to it with a virtual clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use stratus_client::{AsyncStrategy, ClientConfig, ManualClock, StratusClient};
use stratus_http::{Headers, HttpError, HttpRequest, HttpTransport, Method, StreamingResponse};

pub const BASE_URL: &str = "http://api.test";

pub type Handler = Box<dyn FnMut(&HttpRequest) -> Result<StreamingResponse, HttpError> + Send>;

struct Route {
    method: Method,
    /// Exact path, or a prefix when it ends with `*`.
    pattern: String,
    /// Locked on its own so handlers of different routes can run at once.
    handler: Arc<Mutex<Handler>>,
}

fn matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    }
}

/// A request as the fake transport saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    /// URL without scheme and host.
    pub path: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub follow_redirects: bool,
}

impl Recorded {
    pub fn json(&self) -> Value {
        match &self.body {
            Some(body) => serde_json::from_slice(body).expect("request body is JSON"),
            None => Value::Null,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

#[derive(Default)]
struct State {
    routes: Vec<Route>,
    requests: Vec<Recorded>,
}

/// Transport that answers from scripted routes and records every request.
///
/// Routes registered later win over earlier ones, so a test can override the
/// defaults. A request without a route panics. Handlers run without the
/// transport's own lock held.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the redirect probe and hands out `tok-1`, `tok-2`, ... on
    /// every authentication.
    pub fn with_auth() -> Self {
        let fake = Self::new();
        fake.reply(Method::Get, "", 200, json!({}));
        let issued = AtomicUsize::new(0);
        fake.on(Method::Post, "/auth", move |_| {
            let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json_response(200, json!({"access_token": format!("tok-{}", n)})))
        });
        fake
    }

    pub fn on<F>(&self, method: Method, pattern: &str, handler: F)
    where
        F: FnMut(&HttpRequest) -> Result<StreamingResponse, HttpError> + Send + 'static,
    {
        self.lock().routes.push(Route {
            method,
            pattern: pattern.to_string(),
            handler: Arc::new(Mutex::new(Box::new(handler))),
        });
    }

    /// Always answer with the same status and JSON body.
    pub fn reply(&self, method: Method, pattern: &str, status: u16, body: Value) {
        self.on(method, pattern, move |_| Ok(json_response(status, body.clone())));
    }

    /// Answer with each reply in turn; the last one repeats.
    pub fn sequence(&self, method: Method, pattern: &str, replies: Vec<(u16, Value)>) {
        let mut replies: VecDeque<(u16, Value)> = replies.into();
        self.on(method, pattern, move |_| {
            let (status, body) = if replies.len() > 1 {
                replies.pop_front().expect("non-empty")
            } else {
                replies.front().cloned().expect("sequence has at least one reply")
            };
            Ok(json_response(status, body))
        });
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.lock().requests.clone()
    }

    /// Requests matching `method` and `pattern`.
    pub fn requests_to(&self, method: Method, pattern: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && matches(pattern, &r.path))
            .collect()
    }

    pub fn count(&self, method: Method, pattern: &str) -> usize {
        self.requests_to(method, pattern).len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: &HttpRequest) -> Result<StreamingResponse, HttpError> {
        let path = path_of(&request.url).to_string();
        let handler = {
            let mut state = self.lock();
            state.requests.push(Recorded {
                method: request.method,
                url: request.url.clone(),
                path: path.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                follow_redirects: request.follow_redirects,
            });
            state
                .routes
                .iter()
                .rev()
                .find(|route| route.method == request.method && matches(&route.pattern, &path))
                .map(|route| Arc::clone(&route.handler))
        };
        match handler {
            Some(handler) => {
                let mut handler = handler.lock().unwrap_or_else(|p| p.into_inner());
                (*handler)(request)
            }
            None => panic!("no route for {} {}", request.method, request.url),
        }
    }
}

/// Path part of an absolute URL.
pub fn path_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match rest.find('/') {
        Some(i) => &rest[i..],
        None => "",
    }
}

pub fn response(status: u16, body: impl Into<Vec<u8>>) -> StreamingResponse {
    StreamingResponse {
        status,
        headers: Headers::new(),
        body: Box::new(Cursor::new(body.into())),
    }
}

pub fn json_response(status: u16, body: Value) -> StreamingResponse {
    response(status, serde_json::to_vec(&body).expect("serializable"))
}

pub fn redirect(location: &str) -> StreamingResponse {
    StreamingResponse {
        status: 301,
        headers: [("Location", location)].into_iter().collect(),
        body: Box::new(io::empty()),
    }
}

pub fn stream(status: u16, reader: impl Read + Send + 'static) -> StreamingResponse {
    StreamingResponse {
        status,
        headers: Headers::new(),
        body: Box::new(reader),
    }
}

/// Yields its data, then fails like a dropped connection.
pub struct BrokenStream {
    data: Cursor<Vec<u8>>,
}

impl BrokenStream {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Cursor::new(data.into()),
        }
    }
}

impl Read for BrokenStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.read(buf)? {
            0 => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            n => Ok(n),
        }
    }
}

/// `bytes=START-[END]` from a Range header.
pub fn range_start(request: &HttpRequest) -> u64 {
    request
        .headers
        .get("Range")
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.split('-').next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

/// Server side of the upload protocol for upload `uuid`, backed by a shared
/// buffer. When `fail` returns true for the zero-based index of a data
/// request, the chunk is stored anyway and the request fails with a 500,
/// like a server that broke after a partial write.
pub fn install_upload_server<F>(fake: &FakeTransport, uuid: &str, fail: F) -> Arc<Mutex<Vec<u8>>>
where
    F: Fn(usize) -> bool + Send + 'static,
{
    let stored = Arc::new(Mutex::new(Vec::new()));
    fake.reply(
        Method::Post,
        "/upload",
        200,
        json!({"uuid": uuid, "node": "sf-1"}),
    );

    let data = Arc::clone(&stored);
    let calls = AtomicUsize::new(0);
    fake.on(Method::Post, &format!("/upload/{}", uuid), move |request| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let mut data = data.lock().unwrap();
        data.extend_from_slice(request.body.as_deref().unwrap_or_default());
        if fail(call) {
            return Ok(json_response(500, json!({"error": "disk hiccup"})));
        }
        Ok(json_response(200, json!(data.len())))
    });

    let data = Arc::clone(&stored);
    fake.on(
        Method::Post,
        &format!("/upload/{}/truncate/*", uuid),
        move |request| {
            let offset: usize = path_of(&request.url)
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .expect("truncate offset");
            data.lock().unwrap().truncate(offset);
            Ok(json_response(200, Value::Null))
        },
    );
    stored
}

pub fn config(strategy: AsyncStrategy) -> ClientConfig {
    ClientConfig::new()
        .with_base_url(BASE_URL)
        .with_credentials("ops", "secret")
        .with_async_strategy(strategy)
}

/// A client wired to a fake transport and a virtual clock.
pub struct Harness {
    pub fake: FakeTransport,
    pub clock: Arc<ManualClock>,
    pub client: StratusClient,
}

impl Harness {
    pub fn new(strategy: AsyncStrategy) -> Self {
        Self::with_config(FakeTransport::with_auth(), config(strategy))
    }

    pub fn with_config(fake: FakeTransport, config: ClientConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let client = StratusClient::with_transport(config, fake.clone()).with_clock(clock.clone());
        Self {
            fake,
            clock,
            client,
        }
    }

    /// The server reports no optional features.
    pub fn without_capabilities(self) -> Self {
        self.fake
            .reply(Method::Get, "/capabilities", 404, json!({"error": "not found"}));
        self
    }

    pub fn with_capabilities(self, names: &[&str]) -> Self {
        self.fake
            .reply(Method::Get, "/capabilities", 200, json!(names));
        self
    }
}
