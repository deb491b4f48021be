// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native transport backed by `ureq`.

use std::time::Duration;

use tracing::trace;

use crate::{Headers, HttpError, HttpRequest, HttpTransport, StreamingResponse};

/// Socket-level settings for [`UreqTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Applied to every read and write on the socket. This is the hard bound
    /// on a single stuck call; logical deadlines are enforced above it.
    pub io_timeout: Duration,
    pub user_agent: String,
    pub max_redirects: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(300),
            user_agent: format!("stratus-http/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 5,
        }
    }
}

/// Blocking transport over `ureq`.
///
/// Two agents share one configuration: one follows redirects, the other
/// hands 3xx responses back untouched.
pub struct UreqTransport {
    following: ureq::Agent,
    direct: ureq::Agent,
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            following: build_agent(config, config.max_redirects),
            direct: build_agent(config, 0),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

fn build_agent(config: &TransportConfig, redirects: u32) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(config.connect_timeout)
        .timeout_read(config.io_timeout)
        .timeout_write(config.io_timeout)
        .redirects(redirects)
        .user_agent(&config.user_agent)
        .build()
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<StreamingResponse, HttpError> {
        let agent = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let mut req = agent.request(request.method.as_str(), &request.url);
        for (name, value) in request.headers.iter() {
            req = req.set(name, value);
        }

        let result = match &request.body {
            Some(body) => req.send_bytes(body),
            None => req.call(),
        };

        let response = match result {
            Ok(response) => response,
            // 4xx/5xx are still responses; the caller decides what they mean.
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => return Err(map_transport(transport)),
        };

        let status = response.status();
        let headers: Headers = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();

        trace!(method = %request.method, url = %request.url, status, "transport response");

        Ok(StreamingResponse {
            status,
            headers,
            body: response.into_reader(),
        })
    }
}

fn map_transport(transport: ureq::Transport) -> HttpError {
    let message = transport.to_string();
    match transport.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => HttpError::Connect(message),
        ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
            HttpError::InvalidUrl(message)
        }
        ureq::ErrorKind::Io => HttpError::Io(message),
        _ => HttpError::Transport(message),
    }
}
