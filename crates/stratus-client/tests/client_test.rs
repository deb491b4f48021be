// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request path tests for StratusClient: authentication, redirects,
//! dependency retries, capabilities and error mapping.

mod common;

use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

use common::{FakeTransport, Harness, config, json_response, redirect};
use serde_json::json;
use stratus_client::{
    ApiErrorKind, AsyncStrategy, ClientConfig, EventFilter, SdkError, capabilities,
};
use stratus_http::{HttpError, HttpRequest, Method, StreamingResponse};

// ============================================================================
// Authentication
// ============================================================================

#[test]
fn test_first_call_probes_then_authenticates() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(Method::Get, "/nodes", 200, json!([]));

    assert!(h.client.list_nodes().unwrap().is_empty());

    let requests = h.fake.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].path, "");
    assert!(!requests[0].follow_redirects);
    assert_eq!(requests[1].path, "/auth");
    assert_eq!(
        requests[1].json(),
        json!({"namespace": "ops", "key": "secret"})
    );
    assert_eq!(requests[1].header("Authorization"), None);
    assert_eq!(requests[2].path, "/nodes");
    assert_eq!(requests[2].header("Authorization"), Some("Bearer tok-1"));
}

#[test]
fn test_token_is_reused_across_calls() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(Method::Get, "/nodes", 200, json!([]));

    h.client.list_nodes().unwrap();
    h.client.list_nodes().unwrap();

    assert_eq!(h.fake.count(Method::Get, ""), 1);
    assert_eq!(h.fake.count(Method::Post, "/auth"), 1);
    assert_eq!(h.fake.count(Method::Get, "/nodes"), 2);
}

#[test]
fn test_permanent_redirect_rewrites_base_url() {
    let fake = FakeTransport::new();
    fake.on(Method::Get, "", |_| Ok(redirect("http://new.test/v2/")));
    fake.reply(Method::Post, "/v2/auth", 200, json!({"access_token": "abc"}));
    fake.reply(Method::Get, "/v2/instances", 200, json!([]));
    let h = Harness::with_config(fake, config(AsyncStrategy::Pause));

    assert!(h.client.list_instances(false).unwrap().is_empty());

    assert_eq!(h.client.base_url(), "http://new.test/v2");
    let requests = h.fake.requests();
    assert_eq!(requests[1].url, "http://new.test/v2/auth");
    assert_eq!(requests[2].url, "http://new.test/v2/instances");
    assert_eq!(requests[2].header("Authorization"), Some("Bearer abc"));
}

#[test]
fn test_rejected_token_is_renewed_once() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.sequence(
        Method::Get,
        "/instances/i1",
        vec![
            (401, json!({"error": "token expired"})),
            (200, json!({"uuid": "i1", "state": "created"})),
        ],
    );

    let instance = h.client.get_instance("i1").unwrap();

    assert_eq!(instance.uuid, "i1");
    assert_eq!(h.fake.count(Method::Post, "/auth"), 2);
    let gets = h.fake.requests_to(Method::Get, "/instances/i1");
    assert_eq!(gets.len(), 2);
    assert_eq!(gets[0].header("Authorization"), Some("Bearer tok-1"));
    assert_eq!(gets[1].header("Authorization"), Some("Bearer tok-2"));
}

#[test]
fn test_second_rejection_is_returned() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake
        .reply(Method::Get, "/instances/i1", 401, json!({"error": "nope"}));

    let err = h.client.get_instance("i1").unwrap_err();

    assert!(err.is_unauthenticated());
    assert_eq!(h.fake.count(Method::Post, "/auth"), 2);
    assert_eq!(h.fake.count(Method::Get, "/instances/i1"), 2);
}

#[test]
fn test_missing_credentials_is_config_error() {
    let config = ClientConfig::new().with_base_url(common::BASE_URL);
    let h = Harness::with_config(FakeTransport::with_auth(), config);

    let err = h.client.list_nodes().unwrap_err();

    assert!(matches!(err, SdkError::Config(_)));
    assert_eq!(h.fake.count(Method::Post, "/auth"), 0);
}

#[test]
fn test_failed_authentication_is_unauthenticated() {
    let fake = FakeTransport::new();
    fake.reply(Method::Get, "", 200, json!({}));
    fake.reply(Method::Post, "/auth", 401, json!({"error": "bad key"}));
    let h = Harness::with_config(fake, config(AsyncStrategy::Pause));

    let err = h.client.list_nodes().unwrap_err();

    assert!(err.is_unauthenticated());
    assert_eq!(err.server_message().as_deref(), Some("bad key"));
}

#[test]
fn test_authentication_reply_without_token() {
    let fake = FakeTransport::new();
    fake.reply(Method::Get, "", 200, json!({}));
    fake.reply(Method::Post, "/auth", 200, json!({"token": "wrong-field"}));
    let h = Harness::with_config(fake, config(AsyncStrategy::Pause));

    let err = h.client.list_nodes().unwrap_err();

    assert!(matches!(err, SdkError::UnexpectedResponse(_)));
}

#[test]
fn test_failed_authentication_keeps_server_failure_kind() {
    let fake = FakeTransport::new();
    fake.reply(Method::Get, "", 200, json!({}));
    fake.reply(Method::Post, "/auth", 500, json!({"error": "database down"}));
    let h = Harness::with_config(fake, config(AsyncStrategy::Pause));

    let err = h.client.list_nodes().unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::InternalServerError));
    assert!(!err.is_unauthenticated());
}

// ============================================================================
// Shared clients
// ============================================================================

/// Rejects `tok-1` once both callers have presented it, accepts anything else.
fn reject_first_token(
    both_sent: Arc<Barrier>,
    body: serde_json::Value,
) -> impl FnMut(&HttpRequest) -> Result<StreamingResponse, HttpError> + Send + 'static {
    move |request: &HttpRequest| {
        if request.headers.get("Authorization") == Some("Bearer tok-1") {
            both_sent.wait();
            return Ok(json_response(401, json!({"error": "token expired"})));
        }
        Ok(json_response(200, body.clone()))
    }
}

#[test]
fn test_shared_client_renews_rejected_token_once() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(Method::Get, "/auth/namespaces", 200, json!([]));
    h.client.list_namespaces().unwrap();

    let both_sent = Arc::new(Barrier::new(2));
    h.fake.on(
        Method::Get,
        "/nodes",
        reject_first_token(Arc::clone(&both_sent), json!([])),
    );
    h.fake.on(
        Method::Get,
        "/admin/locks",
        reject_first_token(both_sent, json!({})),
    );
    let client = Arc::new(h.client);

    let nodes = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.list_nodes().map(|nodes| nodes.len()))
    };
    let locks = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.get_existing_locks())
    };

    assert_eq!(nodes.join().unwrap().unwrap(), 0);
    assert_eq!(locks.join().unwrap().unwrap(), json!({}));
    assert_eq!(h.fake.count(Method::Post, "/auth"), 2);
    let renewed = h
        .fake
        .requests()
        .iter()
        .filter(|r| r.header("Authorization") == Some("Bearer tok-2"))
        .count();
    assert_eq!(renewed, 2);
}

#[test]
fn test_debug_does_not_block_first_authentication() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(Method::Get, "/nodes", 200, json!([]));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    h.fake.on(Method::Get, "", move |_| {
        entered_tx.send(()).ok();
        gate_rx.recv().ok();
        Ok(json_response(200, json!({})))
    });
    let client = Arc::new(h.client);

    let worker = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.list_nodes().map(|nodes| nodes.len()))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker reached the redirect check");

    let (debug_tx, debug_rx) = mpsc::channel();
    {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            debug_tx.send(format!("{:?}", client)).ok();
        });
    }
    thread::sleep(Duration::from_millis(100));
    gate_tx.send(()).unwrap();

    let debug = debug_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("Debug finished while authentication was in flight");
    assert!(debug.contains("http://api.test"));
    assert_eq!(worker.join().unwrap().unwrap(), 0);
}

// ============================================================================
// Dependency retries
// ============================================================================

#[test]
fn test_namespace_delete_retries_until_dependencies_clear() {
    let h = Harness::new(AsyncStrategy::Pause);
    let busy = (406, json!({"error": "namespace has instances"}));
    h.fake.sequence(
        Method::Delete,
        "/auth/namespaces/ops",
        vec![busy.clone(), busy.clone(), busy, (200, json!(null))],
    );

    h.client.delete_namespace(None).unwrap();

    assert_eq!(h.fake.count(Method::Delete, "/auth/namespaces/ops"), 4);
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(1); 3]);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(3));
}

#[test]
fn test_namespace_delete_gives_up_after_deadline() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(
        Method::Delete,
        "/auth/namespaces/scratch",
        406,
        json!({"error": "namespace has instances"}),
    );

    let err = h.client.delete_namespace(Some("scratch")).unwrap_err();

    assert!(err.is_dependency_not_ready());
    assert_eq!(h.fake.count(Method::Delete, "/auth/namespaces/scratch"), 62);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(61));
}

#[test]
fn test_continue_strategy_does_not_retry_dependencies() {
    let h = Harness::new(AsyncStrategy::Continue);
    h.fake.reply(
        Method::Delete,
        "/auth/namespaces/ops",
        406,
        json!({"error": "namespace has instances"}),
    );

    let err = h.client.delete_namespace(None).unwrap_err();

    assert!(err.is_dependency_not_ready());
    assert_eq!(h.fake.count(Method::Delete, "/auth/namespaces/ops"), 1);
    assert!(h.clock.sleeps().is_empty());
}

#[test]
fn test_other_failures_are_not_retried() {
    let h = Harness::new(AsyncStrategy::Block);
    h.fake
        .reply(Method::Delete, "/auth/namespaces/ops", 409, json!({"error": "busy"}));

    let err = h.client.delete_namespace(None).unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::ResourceInUse));
    assert_eq!(h.fake.count(Method::Delete, "/auth/namespaces/ops"), 1);
}

// ============================================================================
// Capabilities
// ============================================================================

#[test]
fn test_capabilities_not_found_means_none() {
    let h = Harness::new(AsyncStrategy::Pause).without_capabilities();

    assert!(h.client.capabilities().unwrap().is_empty());
    assert!(!h.client.has_capability(capabilities::BLOB_SEARCH_BY_HASH).unwrap());
    assert_eq!(h.fake.count(Method::Get, "/capabilities"), 1);
}

#[test]
fn test_capabilities_are_cached() {
    let h = Harness::new(AsyncStrategy::Pause)
        .with_capabilities(&["blob-search-by-hash", "artifact-metadata"]);

    assert!(h.client.has_capability("artifact-metadata").unwrap());
    assert!(h.client.has_capability("blob-search-by-hash").unwrap());
    assert!(!h.client.has_capability("node-metadata").unwrap());
    assert_eq!(h.fake.count(Method::Get, "/capabilities"), 1);
}

#[test]
fn test_missing_capability_blocks_request() {
    let h = Harness::new(AsyncStrategy::Pause).without_capabilities();

    let err = h.client.get_artifact_metadata("a1").unwrap_err();

    assert!(matches!(err, SdkError::CapabilityMissing(ref name) if name == "artifact-metadata"));
    assert_eq!(h.fake.count(Method::Get, "/artifacts/a1/metadata"), 0);
}

#[test]
fn test_capability_enables_request() {
    let h = Harness::new(AsyncStrategy::Pause).with_capabilities(&["artifact-metadata"]);
    h.fake
        .reply(Method::Get, "/artifacts/a1/metadata", 200, json!({"owner": "ci"}));

    let metadata = h.client.get_artifact_metadata("a1").unwrap();

    assert_eq!(metadata.get("owner"), Some(&json!("ci")));
}

// ============================================================================
// Errors and bodies
// ============================================================================

#[test]
fn test_status_maps_to_error_kind() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(
        Method::Get,
        "/instances/missing",
        404,
        json!({"error": "instance not found"}),
    );

    let err = h.client.get_instance("missing").unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.server_message().as_deref(), Some("instance not found"));
    match err {
        SdkError::Api {
            method, url, status, ..
        } => {
            assert_eq!(method, Method::Get);
            assert_eq!(url, "http://api.test/instances/missing");
            assert_eq!(status, 404);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_transport_failure_is_connection_error() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.on(Method::Get, "/nodes", |_| {
        Err(HttpError::Connect("connection refused".to_string()))
    });

    let err = h.client.list_nodes().unwrap_err();

    assert!(matches!(err, SdkError::Connection(_)));
}

#[test]
fn test_undecodable_reply_is_serialization_error() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake
        .on(Method::Get, "/nodes", |_| Ok(common::response(200, "<html>")));

    let err = h.client.list_nodes().unwrap_err();

    assert!(matches!(err, SdkError::Serialization(_)));
}

#[test]
fn test_issue_returns_raw_response() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake
        .on(Method::Post, "/instances/i1/rebootsoft", |request| {
            assert_eq!(request.body.as_deref(), Some(&b"{\"why\":\"test\"}"[..]));
            Ok(json_response(200, json!({"uuid": "i1"})))
        });

    let response = h
        .client
        .issue(
            Method::Post,
            "/instances/i1/rebootsoft",
            Some(json!({"why": "test"})),
        )
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.text().contains("i1"));
}

#[test]
fn test_empty_reply_body_is_null() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake
        .on(Method::Post, "/interfaces/if1/float", |_| Ok(common::response(204, "")));

    assert_eq!(h.client.float_interface("if1").unwrap(), json!(null));
}

// ============================================================================
// Request shapes
// ============================================================================

#[test]
fn test_event_filter_is_sent_as_body() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(
        Method::Get,
        "/instances/i1/events",
        200,
        json!([{"timestamp": 1700000000.5, "type": "audit", "message": "created"}]),
    );

    let events = h
        .client
        .get_instance_events("i1", &EventFilter::new().with_type("audit").with_limit(10))
        .unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type.as_deref(), Some("audit"));
    assert_eq!(events[0].timestamp.timestamp(), 1_700_000_000);
    let sent = h.fake.requests_to(Method::Get, "/instances/i1/events");
    assert_eq!(sent[0].json(), json!({"event_type": "audit", "limit": 10}));
}

#[test]
fn test_metadata_value_is_wrapped() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake
        .reply(Method::Put, "/networks/n1/metadata/role", 200, json!(null));

    h.client
        .set_network_metadata_item("n1", "role", json!("frontend"))
        .unwrap();

    let sent = h.fake.requests_to(Method::Put, "/networks/n1/metadata/role");
    assert_eq!(sent[0].json(), json!({"value": "frontend"}));
}

#[test]
fn test_delete_all_networks_body() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake.reply(Method::Delete, "/networks", 200, json!(["n1"]));

    h.client.delete_all_networks(Some("team"), true).unwrap();

    let sent = h.fake.requests_to(Method::Delete, "/networks");
    assert_eq!(
        sent[0].json(),
        json!({"confirm": true, "namespace": "team", "clean_wait": true})
    );
}

#[test]
fn test_blob_search_not_found_is_none() {
    let h = Harness::new(AsyncStrategy::Pause);
    h.fake
        .reply(Method::Get, "/blob_checksums/sha512/*", 404, json!({"error": "no"}));

    assert_eq!(h.client.find_blob_by_sha512("abc").unwrap(), None);
}
