// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stratus-client.

use std::fmt;

use stratus_http::{HttpError, Method};
use thiserror::Error;

/// Result type using SdkError.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Failure category derived from the HTTP status of an API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// 400
    RequestMalformed,
    /// 401
    Unauthenticated,
    /// 403, including "resource cannot be deleted".
    Unauthorized,
    /// 404
    NotFound,
    /// 406: the request depends on a resource that is not ready yet.
    DependenciesNotReady,
    /// 409: the resource is in a state that conflicts with the request.
    ResourceInUse,
    /// 500
    InternalServerError,
    /// 507
    InsufficientResources,
    /// Any other status outside the accepted set.
    UnexpectedStatus,
}

impl ApiErrorKind {
    /// Category for a status code that the caller did not accept.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ApiErrorKind::RequestMalformed,
            401 => ApiErrorKind::Unauthenticated,
            403 => ApiErrorKind::Unauthorized,
            404 => ApiErrorKind::NotFound,
            406 => ApiErrorKind::DependenciesNotReady,
            409 => ApiErrorKind::ResourceInUse,
            500 => ApiErrorKind::InternalServerError,
            507 => ApiErrorKind::InsufficientResources,
            _ => ApiErrorKind::UnexpectedStatus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::RequestMalformed => "malformed request",
            ApiErrorKind::Unauthenticated => "not authenticated",
            ApiErrorKind::Unauthorized => "not authorized",
            ApiErrorKind::NotFound => "resource not found",
            ApiErrorKind::DependenciesNotReady => "dependencies not ready",
            ApiErrorKind::ResourceInUse => "resource in use",
            ApiErrorKind::InternalServerError => "internal server error",
            ApiErrorKind::InsufficientResources => "insufficient resources",
            ApiErrorKind::UnexpectedStatus => "unexpected status",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when using the client.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Async strategy name is not one of continue, pause or block.
    #[error("unknown async strategy: {0}")]
    UnknownStrategy(String),

    /// The request never produced a response.
    #[error("connection error: {0}")]
    Connection(String),

    /// The API answered with a status outside the accepted set.
    #[error("{kind} [{status}] {method} {url}: {body}")]
    Api {
        kind: ApiErrorKind,
        method: Method,
        url: String,
        status: u16,
        body: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Response was well-formed but not what the operation expected.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local I/O (reading a source file, writing a destination).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Byte counts disagree between the two ends of a transfer.
    #[error("{context}: expected {expected} bytes, got {actual}")]
    Integrity {
        context: String,
        expected: u64,
        actual: u64,
    },

    /// A transfer kept failing and gave up.
    #[error("giving up after {attempts} consecutive failures: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SdkError>,
    },

    /// A transfer attempt failed without moving any bytes.
    #[error("transfer stalled at offset {offset}: {reason}")]
    StalledTransfer { offset: u64, reason: String },

    /// The server does not implement an optional feature.
    #[error("server does not support {0}")]
    CapabilityMissing(String),
}

impl SdkError {
    /// Category of an API failure, if this is one.
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            SdkError::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_dependency_not_ready(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::DependenciesNotReady)
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::Unauthenticated)
    }

    pub fn is_not_found(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::NotFound)
    }

    /// Failures worth retrying inside a transfer: the connection dropped or
    /// the server hiccupped. Client mistakes and local I/O are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SdkError::Connection(_) => true,
            SdkError::Api { kind, .. } => matches!(
                kind,
                ApiErrorKind::InternalServerError
                    | ApiErrorKind::InsufficientResources
                    | ApiErrorKind::UnexpectedStatus
            ),
            _ => false,
        }
    }

    /// Server-provided error message, when the body is `{"error": "..."}`.
    pub fn server_message(&self) -> Option<String> {
        match self {
            SdkError::Api { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string)),
            _ => None,
        }
    }
}

impl From<HttpError> for SdkError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::InvalidUrl(msg) => SdkError::Config(format!("invalid url: {}", msg)),
            other => SdkError::Connection(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}
