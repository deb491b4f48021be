// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error type tests for stratus-client.

use std::error::Error as _;

use stratus_client::{ApiErrorKind, Method, SdkError};

#[test]
fn test_config_error_display() {
    let err = SdkError::Config("missing credentials".to_string());
    assert!(err.to_string().contains("configuration error"));
    assert!(err.to_string().contains("missing credentials"));
}

#[test]
fn test_connection_error_display() {
    let err = SdkError::Connection("connection refused".to_string());
    assert!(err.to_string().contains("connection error"));
    assert!(err.to_string().contains("connection refused"));
}

#[test]
fn test_unknown_strategy_display() {
    let err = SdkError::UnknownStrategy("hurry".to_string());
    assert_eq!(err.to_string(), "unknown async strategy: hurry");
}

#[test]
fn test_api_error_display() {
    let err = SdkError::Api {
        kind: ApiErrorKind::ResourceInUse,
        method: Method::Delete,
        url: "http://localhost:13000/networks/n1".to_string(),
        status: 409,
        body: r#"{"error": "network has interfaces"}"#.to_string(),
    };
    let display = err.to_string();
    assert!(display.starts_with("resource in use [409] DELETE http://localhost:13000/networks/n1"));
    assert!(display.contains("network has interfaces"));
    assert_eq!(err.server_message().as_deref(), Some("network has interfaces"));
}

#[test]
fn test_serialization_error_display() {
    let err = SdkError::Serialization("invalid JSON".to_string());
    assert!(err.to_string().contains("serialization error"));
}

#[test]
fn test_serde_error_conversion() {
    let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: SdkError = parse.into();
    assert!(matches!(err, SdkError::Serialization(_)));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
    let err: SdkError = io.into();
    assert!(matches!(err, SdkError::Io(_)));
    assert!(err.to_string().contains("read-only"));
}

#[test]
fn test_integrity_error_display() {
    let err = SdkError::Integrity {
        context: "download".to_string(),
        expected: 100,
        actual: 90,
    };
    assert_eq!(err.to_string(), "download: expected 100 bytes, got 90");
}

#[test]
fn test_retries_exhausted_keeps_last_failure() {
    let err = SdkError::RetriesExhausted {
        attempts: 6,
        source: Box::new(SdkError::Connection("reset".to_string())),
    };
    assert!(err.to_string().starts_with("giving up after 6 consecutive failures"));
    let source = err.source().expect("has source");
    assert!(source.to_string().contains("reset"));
    assert!(!err.is_transient());
}

#[test]
fn test_stalled_transfer_display() {
    let err = SdkError::StalledTransfer {
        offset: 4096,
        reason: "connection reset by peer".to_string(),
    };
    assert!(err.to_string().contains("offset 4096"));
}

#[test]
fn test_capability_missing_display() {
    let err = SdkError::CapabilityMissing("artifact-metadata".to_string());
    assert_eq!(err.to_string(), "server does not support artifact-metadata");
}

#[test]
fn test_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SdkError>();
}

#[test]
fn test_error_debug() {
    let err = SdkError::Config("test".to_string());
    let debug = format!("{:?}", err);
    assert!(debug.contains("Config"));
}
