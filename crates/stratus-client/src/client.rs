// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! StratusClient for interacting with the control-plane REST API.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, trace};

use stratus_http::{
    HttpRequest, HttpResponse, HttpTransport, Method, StreamingResponse, TransportConfig,
    UreqTransport, range_header,
};

use crate::capabilities::{self, Capabilities};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ApiErrorKind, Result, SdkError};
use crate::retry::with_dependency_retry;
use crate::strategy::AsyncStrategy;
use crate::transfer::{self, BlobSource, RANGE_WINDOW, TransferObserver, UploadSink};
use crate::types::{
    AgentOperation, AllocateNetworkOptions, Artifact, ArtifactOptions, AwaitedResource, Blob,
    CreateInstanceOptions, Event, EventFilter, Instance, Interface, Metadata, Network, Node,
    Snapshot, SnapshotEntry, SnapshotOptions, SnapshotOutcome, Upload, UploadedArtifact,
};
use crate::wait::{
    self, AGENT_OPERATION, Awaited, INSTANCE_CREATE, INSTANCE_DELETE, Lifecycle, NETWORK_CREATE,
    NETWORK_DELETE, PendingOperation, SNAPSHOT_BLOB,
};

/// User agent sent with every request.
pub fn user_agent() -> String {
    format!("stratus-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Request body.
#[derive(Debug, Clone)]
enum Body {
    Empty,
    Json(Value),
    Binary(Vec<u8>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client for the stratus control plane.
///
/// Every call is a blocking HTTP request. The client authenticates lazily on
/// first use, renews its token once when the server rejects it, and retries
/// requests that fail because a dependency is not ready until the deadline of
/// its [`AsyncStrategy`]. Operations whose effect completes asynchronously on
/// the server then wait for the resource to settle under the same strategy.
///
/// The client is `Send + Sync`; the token and capability caches are guarded
/// so a shared client never authenticates twice for the same stale token.
pub struct StratusClient {
    transport: Box<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
    base_url: Mutex<String>,
    credential: Mutex<Option<String>>,
    capabilities: Mutex<Option<Capabilities>>,
}

impl std::fmt::Debug for StratusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // One lock at a time: authentication holds `credential` while it
        // reads `base_url`.
        let base_url = self.base_url();
        let authenticated = lock(&self.credential).is_some();
        f.debug_struct("StratusClient")
            .field("config", &self.config)
            .field("base_url", &base_url)
            .field("authenticated", &authenticated)
            .finish_non_exhaustive()
    }
}

impl StratusClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = UreqTransport::new(&TransportConfig {
            connect_timeout: config.connect_timeout,
            io_timeout: config.request_timeout,
            user_agent: user_agent(),
            ..TransportConfig::default()
        });
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client that sends requests through `transport`.
    pub fn with_transport(config: ClientConfig, transport: impl HttpTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            clock: Arc::new(SystemClock),
            base_url: Mutex::new(config.base_url.clone()),
            config,
            credential: Mutex::new(None),
            capabilities: Mutex::new(None),
        }
    }

    /// Replace the clock used by every wait and retry loop.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the async strategy.
    pub fn with_async_strategy(mut self, strategy: AsyncStrategy) -> Self {
        self.config.async_strategy = strategy;
        self
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Create a client from the environment and credentials files.
    pub fn discover() -> Result<Self> {
        Self::new(ClientConfig::discover()?)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn async_strategy(&self) -> AsyncStrategy {
        self.config.async_strategy
    }

    /// Base URL in use. It can differ from the configured one after the
    /// server redirected the first request.
    pub fn base_url(&self) -> String {
        lock(&self.base_url).clone()
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Issue one request without authentication handling or retries.
    fn send_once(
        &self,
        method: Method,
        path: &str,
        body: &Body,
        credential: Option<&str>,
        headers: &[(&str, String)],
        follow_redirects: bool,
    ) -> Result<StreamingResponse> {
        let url = format!("{}{}", lock(&self.base_url), path);
        let mut request = HttpRequest::new(method, url.clone());
        if !follow_redirects {
            request = request.without_redirects();
        }
        if let Some(credential) = credential {
            request = request.with_header("Authorization", credential);
        }
        for (name, value) in headers {
            request = request.with_header(*name, value.clone());
        }
        match body {
            Body::Empty => {}
            Body::Json(value) => {
                trace!(%method, %url, body = %value, "request body");
                request = request
                    .with_header("Content-Type", "application/json")
                    .with_body(serde_json::to_vec(value)?);
            }
            Body::Binary(bytes) => {
                trace!(%method, %url, bytes = bytes.len(), "binary request body omitted");
                request = request
                    .with_header("Content-Type", "application/octet-stream")
                    .with_body(bytes.clone());
            }
        }

        let started = self.clock.now();
        let response = self.transport.send(&request)?;
        let elapsed = self.clock.now().saturating_duration_since(started);
        debug!(
            %method,
            %url,
            status = response.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "api request"
        );

        match response.status {
            200 | 201 | 204 | 206 => Ok(response),
            301 if !follow_redirects => Ok(response),
            status => {
                let body = response
                    .into_buffered()
                    .map(|r| r.text())
                    .unwrap_or_default();
                Err(SdkError::Api {
                    kind: ApiErrorKind::from_status(status),
                    method,
                    url,
                    status,
                    body,
                })
            }
        }
    }

    /// Exchange the namespace and key for a bearer token.
    fn authenticate(&self) -> Result<String> {
        let (Some(namespace), Some(key)) = (&self.config.namespace, &self.config.key) else {
            return Err(SdkError::Config(
                "a namespace and key are required to authenticate".to_string(),
            ));
        };
        debug!(namespace = %namespace, "authentication request made, contents not logged");

        let url = format!("{}/auth", lock(&self.base_url));
        let request = HttpRequest::new(Method::Post, url.clone())
            .with_header("Content-Type", "application/json")
            .with_body(serde_json::to_vec(&json!({"namespace": namespace, "key": key}))?);
        let response = self.transport.execute(&request)?;
        if response.status != 200 {
            let kind = match response.status {
                401 | 403 => ApiErrorKind::Unauthenticated,
                status => ApiErrorKind::from_status(status),
            };
            return Err(SdkError::Api {
                kind,
                method: Method::Post,
                url,
                status: response.status,
                body: response.text(),
            });
        }

        let token: Value = serde_json::from_slice(&response.body)?;
        let token = token
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SdkError::UnexpectedResponse("authentication reply has no access_token".into())
            })?;
        Ok(format!("Bearer {}", token))
    }

    /// Follow a permanent redirect of the API root, once, before the first
    /// authentication.
    fn probe_redirect(&self) -> Result<()> {
        let response = self.send_once(Method::Get, "", &Body::Empty, None, &[], false)?;
        if response.status == 301 {
            if let Some(location) = response.headers.get("Location") {
                let location = location.trim_end_matches('/').to_string();
                info!(location = %location, "API server redirects, rewriting base url");
                *lock(&self.base_url) = location;
            }
        }
        Ok(())
    }

    /// Cached token, authenticating first if there is none yet.
    fn credential(&self) -> Result<String> {
        let mut credential = lock(&self.credential);
        if let Some(token) = credential.as_ref() {
            return Ok(token.clone());
        }
        self.probe_redirect()?;
        let token = self.authenticate()?;
        *credential = Some(token.clone());
        Ok(token)
    }

    /// Replace `stale` with a fresh token, unless another caller already did.
    fn refresh_credential(&self, stale: &str) -> Result<String> {
        let mut credential = lock(&self.credential);
        if let Some(current) = credential.as_ref() {
            if current != stale {
                return Ok(current.clone());
            }
        }
        debug!("token rejected, authenticating again");
        let token = self.authenticate()?;
        *credential = Some(token.clone());
        Ok(token)
    }

    /// One authenticated request; a rejected token is renewed exactly once.
    fn send_authenticated(
        &self,
        method: Method,
        path: &str,
        body: &Body,
        headers: &[(&str, String)],
    ) -> Result<StreamingResponse> {
        let token = self.credential()?;
        match self.send_once(method, path, body, Some(&token), headers, true) {
            Err(err) if err.is_unauthenticated() => {
                let token = self.refresh_credential(&token)?;
                self.send_once(method, path, body, Some(&token), headers, true)
            }
            other => other,
        }
    }

    /// Authenticated request, retried while dependencies are not ready.
    fn call_with(
        &self,
        method: Method,
        path: &str,
        body: Body,
        headers: &[(&str, String)],
    ) -> Result<StreamingResponse> {
        let deadline = self.config.async_strategy.deadline_from(self.clock.now());
        with_dependency_retry(self.clock.as_ref(), deadline, || {
            self.send_authenticated(method, path, &body, headers)
        })
    }

    fn call(&self, method: Method, path: &str, body: Body) -> Result<HttpResponse> {
        Ok(self.call_with(method, path, body, &[])?.into_buffered()?)
    }

    /// Issue an authenticated request and return the buffered response.
    ///
    /// This is the primitive every typed operation is built on: statuses
    /// outside 200/201/204 (and 206 for ranged reads) become
    /// [`SdkError::Api`], a rejected token is renewed once and
    /// `DependenciesNotReady` is retried until the strategy deadline.
    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    pub fn issue(&self, method: Method, path: &str, body: Option<Value>) -> Result<HttpResponse> {
        let body = body.map(Body::Json).unwrap_or(Body::Empty);
        self.call(method, path, body)
    }

    fn value(&self, method: Method, path: &str, body: Body) -> Result<Value> {
        let response = self.call(method, path, body)?;
        parse_value(&response)
    }

    fn json<T: DeserializeOwned>(&self, method: Method, path: &str, body: Body) -> Result<T> {
        let value = self.value(method, path, body)?;
        serde_json::from_value(value).map_err(|e| {
            SdkError::Serialization(format!("decoding reply to {} {}: {}", method, path, e))
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json(Method::Get, path, Body::Empty)
    }

    /// Fetch a resource for a delete wait; a resource that is gone reads as
    /// `null`, which settles the wait.
    fn get_or_null(&self, path: &str) -> Result<Value> {
        match self.value(Method::Get, path, Body::Empty) {
            Err(err) if err.is_not_found() => Ok(Value::Null),
            other => other,
        }
    }

    fn reference_of(lifecycle: &Lifecycle, snapshot: &Value) -> Result<String> {
        lifecycle.id(snapshot).map(str::to_string).ok_or_else(|| {
            SdkError::UnexpectedResponse(format!(
                "{} reply has no {}",
                lifecycle.name, lifecycle.id_field
            ))
        })
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Optional features of the server, fetched once per client.
    #[instrument(skip(self))]
    pub fn capabilities(&self) -> Result<Capabilities> {
        if let Some(caps) = lock(&self.capabilities).as_ref() {
            return Ok(caps.clone());
        }
        let caps = match self.call(Method::Get, "/capabilities", Body::Empty) {
            Ok(response) => Capabilities::from_json(&response.body)?,
            Err(err) if err.is_not_found() => Capabilities::default(),
            Err(err) => return Err(err),
        };
        debug!(count = caps.len(), "capabilities loaded");
        *lock(&self.capabilities) = Some(caps.clone());
        Ok(caps)
    }

    pub fn has_capability(&self, name: &str) -> Result<bool> {
        Ok(self.capabilities()?.contains(name))
    }

    /// Fail with [`SdkError::CapabilityMissing`] unless the server has `name`.
    pub fn require_capability(&self, name: &str) -> Result<()> {
        if self.has_capability(name)? {
            Ok(())
        } else {
            Err(SdkError::CapabilityMissing(name.to_string()))
        }
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// List instances; `all` includes deleted ones.
    #[instrument(skip(self))]
    pub fn list_instances(&self, all: bool) -> Result<Vec<Instance>> {
        self.json(Method::Get, "/instances", Body::Json(json!({"all": all})))
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn get_instance(&self, instance_ref: &str) -> Result<Instance> {
        self.get(&format!("/instances/{}", instance_ref))
    }

    /// Create an instance and wait for it to leave the creating states.
    #[instrument(skip(self, options), fields(name = %options.name, cpus = options.cpus, memory = options.memory))]
    pub fn create_instance(&self, options: &CreateInstanceOptions) -> Result<Awaited<Instance>> {
        info!("Creating instance");
        let initial = self.value(
            Method::Post,
            "/instances",
            Body::Json(serde_json::to_value(options)?),
        )?;
        let op = PendingOperation::new(Self::reference_of(&INSTANCE_CREATE, &initial)?, &INSTANCE_CREATE);
        let awaited = wait::await_terminal(
            self.clock.as_ref(),
            &op,
            self.config.async_strategy,
            initial,
            |r| self.value(Method::Get, &format!("/instances/{}", r), Body::Empty),
        )?;
        Ok(awaited.try_map(serde_json::from_value)?)
    }

    /// Delete an instance. Unless `async_request` is set, wait until it is
    /// gone; an async request returns the server's reply as still pending.
    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn delete_instance(
        &self,
        instance_ref: &str,
        namespace: Option<&str>,
        async_request: bool,
    ) -> Result<Awaited<Value>> {
        info!("Deleting instance");
        let body = namespace
            .map(|ns| Body::Json(json!({"namespace": ns})))
            .unwrap_or(Body::Empty);
        let reply = self.value(Method::Delete, &format!("/instances/{}", instance_ref), body)?;
        if async_request {
            return Ok(Awaited::StillPending(reply));
        }

        let reference = INSTANCE_DELETE
            .id(&reply)
            .unwrap_or(instance_ref)
            .to_string();
        let op = PendingOperation::new(reference, &INSTANCE_DELETE);
        wait::poll_until_settled(self.clock.as_ref(), &op, self.config.async_strategy, |r| {
            self.get_or_null(&format!("/instances/{}", r))
        })
    }

    /// Delete every instance in `namespace` (or the caller's own) and wait
    /// for each of them.
    #[instrument(skip(self))]
    pub fn delete_all_instances(&self, namespace: Option<&str>) -> Result<Vec<AwaitedResource>> {
        info!("Deleting all instances");
        let deleted: Vec<String> = self.json(
            Method::Delete,
            "/instances",
            Body::Json(json!({"confirm": true, "namespace": namespace})),
        )?;
        let results = wait::await_all(
            self.clock.as_ref(),
            &INSTANCE_DELETE,
            self.config.async_strategy,
            deleted,
            |pending| {
                pending
                    .iter()
                    .map(|r| Ok((r.clone(), self.get_or_null(&format!("/instances/{}", r))?)))
                    .collect()
            },
        )?;
        Ok(results.into_iter().map(AwaitedResource::from).collect())
    }

    /// Snapshot an instance's disks and wait for the blobs to be created.
    ///
    /// Applying a label needs the blob to exist, so a labelled snapshot
    /// always waits with [`AsyncStrategy::Block`].
    #[instrument(skip(self, options), fields(instance = %instance_ref, all = options.all))]
    pub fn snapshot_instance(
        &self,
        instance_ref: &str,
        options: &SnapshotOptions,
    ) -> Result<SnapshotOutcome> {
        info!("Snapshotting instance");
        let devices: BTreeMap<String, SnapshotEntry> = self.json(
            Method::Post,
            &format!("/instances/{}/snapshot", instance_ref),
            Body::Json(json!({"all": options.all, "device": options.device})),
        )?;

        let strategy = if options.label_name.is_some() {
            AsyncStrategy::Block
        } else {
            self.config.async_strategy
        };
        let blobs: Vec<String> = devices.values().map(|e| e.blob_uuid.clone()).collect();
        let results = wait::await_all(self.clock.as_ref(), &SNAPSHOT_BLOB, strategy, blobs, |pending| {
            let snapshots: Vec<Value> = self.json(
                Method::Get,
                &format!("/instances/{}/snapshot", instance_ref),
                Body::Empty,
            )?;
            Ok(snapshots
                .into_iter()
                .filter_map(|s| {
                    let blob = SNAPSHOT_BLOB.id(&s)?.to_string();
                    pending.contains(&blob).then_some((blob, s))
                })
                .collect())
        })?;

        let mut label = None;
        if let (false, Some(label_name)) = (options.all, options.label_name.as_deref()) {
            // Labelling several disks would leave the label on the last one.
            let entry = match options.device.as_deref() {
                Some(device) => devices.get(device),
                None => devices.values().next(),
            }
            .ok_or_else(|| SdkError::UnexpectedResponse("snapshot reply has no devices".into()))?;
            label = Some(self.update_label(label_name, &entry.blob_uuid)?);
            if options.delete_snapshot_after_label {
                if let Some(artifact) = entry.artifact_uuid.as_deref() {
                    self.delete_artifact(artifact)?;
                }
            }
        }

        Ok(SnapshotOutcome {
            devices,
            blobs: results.into_iter().map(AwaitedResource::from).collect(),
            label,
        })
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn get_instance_snapshots(&self, instance_ref: &str) -> Result<Vec<Snapshot>> {
        self.get(&format!("/instances/{}/snapshot", instance_ref))
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn reboot_instance(&self, instance_ref: &str, hard: bool) -> Result<Value> {
        let style = if hard { "hard" } else { "soft" };
        info!(style, "Rebooting instance");
        self.instance_action(instance_ref, &format!("reboot{}", style))
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn power_off_instance(&self, instance_ref: &str) -> Result<Value> {
        info!("Powering off instance");
        self.instance_action(instance_ref, "poweroff")
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn power_on_instance(&self, instance_ref: &str) -> Result<Value> {
        info!("Powering on instance");
        self.instance_action(instance_ref, "poweron")
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn pause_instance(&self, instance_ref: &str) -> Result<Value> {
        info!("Pausing instance");
        self.instance_action(instance_ref, "pause")
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn unpause_instance(&self, instance_ref: &str) -> Result<Value> {
        info!("Unpausing instance");
        self.instance_action(instance_ref, "unpause")
    }

    fn instance_action(&self, instance_ref: &str, action: &str) -> Result<Value> {
        self.value(
            Method::Post,
            &format!("/instances/{}/{}", instance_ref, action),
            Body::Empty,
        )
    }

    #[instrument(skip(self, filter), fields(instance = %instance_ref))]
    pub fn get_instance_events(&self, instance_ref: &str, filter: &EventFilter) -> Result<Vec<Event>> {
        self.events(&format!("/instances/{}/events", instance_ref), filter)
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn get_instance_interfaces(&self, instance_ref: &str) -> Result<Vec<Interface>> {
        self.get(&format!("/instances/{}/interfaces", instance_ref))
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn get_instance_metadata(&self, instance_ref: &str) -> Result<Metadata> {
        self.get(&format!("/instances/{}/metadata", instance_ref))
    }

    #[instrument(skip(self, value), fields(instance = %instance_ref, key = %key))]
    pub fn set_instance_metadata_item(&self, instance_ref: &str, key: &str, value: Value) -> Result<Value> {
        self.set_metadata(&format!("/instances/{}/metadata/{}", instance_ref, key), value)
    }

    #[instrument(skip(self), fields(instance = %instance_ref, key = %key))]
    pub fn delete_instance_metadata_item(&self, instance_ref: &str, key: &str) -> Result<Value> {
        self.value(
            Method::Delete,
            &format!("/instances/{}/metadata/{}", instance_ref, key),
            Body::Empty,
        )
    }

    /// Serial console output, optionally only the last `length` bytes.
    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn get_console_data(&self, instance_ref: &str, length: Option<u64>) -> Result<String> {
        let body = match length {
            Some(length) => json!({"length": length}),
            None => json!({}),
        };
        let response = self.call(
            Method::Get,
            &format!("/instances/{}/consoledata", instance_ref),
            Body::Json(body),
        )?;
        Ok(response.text())
    }

    #[instrument(skip(self), fields(instance = %instance_ref))]
    pub fn delete_console_data(&self, instance_ref: &str) -> Result<()> {
        self.call(
            Method::Delete,
            &format!("/instances/{}/consoledata", instance_ref),
            Body::Empty,
        )?;
        Ok(())
    }

    fn events(&self, path: &str, filter: &EventFilter) -> Result<Vec<Event>> {
        let body = if filter.is_empty() {
            Body::Empty
        } else {
            Body::Json(serde_json::to_value(filter)?)
        };
        self.json(Method::Get, path, body)
    }

    fn set_metadata(&self, path: &str, value: Value) -> Result<Value> {
        self.value(Method::Put, path, Body::Json(json!({"value": value})))
    }

    // =========================================================================
    // Networks
    // =========================================================================

    /// List networks; `all` includes deleted ones.
    #[instrument(skip(self))]
    pub fn list_networks(&self, all: bool) -> Result<Vec<Network>> {
        self.json(Method::Get, "/networks", Body::Json(json!({"all": all})))
    }

    #[instrument(skip(self), fields(network = %network_ref))]
    pub fn get_network(&self, network_ref: &str) -> Result<Network> {
        self.get(&format!("/networks/{}", network_ref))
    }

    /// Allocate a network and wait for it to leave the creating states.
    #[instrument(skip(self, options), fields(name = %options.name, netblock = %options.netblock))]
    pub fn allocate_network(&self, options: &AllocateNetworkOptions) -> Result<Awaited<Network>> {
        info!("Allocating network");
        let initial = self.value(
            Method::Post,
            "/networks",
            Body::Json(serde_json::to_value(options)?),
        )?;
        let op = PendingOperation::new(Self::reference_of(&NETWORK_CREATE, &initial)?, &NETWORK_CREATE);
        let awaited = wait::await_terminal(
            self.clock.as_ref(),
            &op,
            self.config.async_strategy,
            initial,
            |r| self.value(Method::Get, &format!("/networks/{}", r), Body::Empty),
        )?;
        Ok(awaited.try_map(serde_json::from_value)?)
    }

    /// Delete a network and wait until it is gone.
    #[instrument(skip(self), fields(network = %network_ref))]
    pub fn delete_network(&self, network_ref: &str, namespace: Option<&str>) -> Result<Awaited<Value>> {
        info!("Deleting network");
        let body = namespace
            .map(|ns| Body::Json(json!({"namespace": ns})))
            .unwrap_or(Body::Empty);
        let reply = self.value(Method::Delete, &format!("/networks/{}", network_ref), body)?;
        let reference = NETWORK_DELETE
            .id(&reply)
            .unwrap_or(network_ref)
            .to_string();
        let op = PendingOperation::new(reference, &NETWORK_DELETE);
        wait::await_terminal(self.clock.as_ref(), &op, self.config.async_strategy, reply, |r| {
            self.get_or_null(&format!("/networks/{}", r))
        })
    }

    /// Delete every network in `namespace`. With `clean_wait` the server
    /// waits for instances on those networks to be cleaned up first.
    #[instrument(skip(self))]
    pub fn delete_all_networks(&self, namespace: Option<&str>, clean_wait: bool) -> Result<Value> {
        info!("Deleting all networks");
        self.value(
            Method::Delete,
            "/networks",
            Body::Json(json!({"confirm": true, "namespace": namespace, "clean_wait": clean_wait})),
        )
    }

    #[instrument(skip(self, filter), fields(network = %network_ref))]
    pub fn get_network_events(&self, network_ref: &str, filter: &EventFilter) -> Result<Vec<Event>> {
        self.events(&format!("/networks/{}/events", network_ref), filter)
    }

    #[instrument(skip(self), fields(network = %network_ref))]
    pub fn get_network_interfaces(&self, network_ref: &str) -> Result<Vec<Interface>> {
        self.get(&format!("/networks/{}/interfaces", network_ref))
    }

    #[instrument(skip(self), fields(network = %network_ref))]
    pub fn get_network_metadata(&self, network_ref: &str) -> Result<Metadata> {
        self.get(&format!("/networks/{}/metadata", network_ref))
    }

    #[instrument(skip(self, value), fields(network = %network_ref, key = %key))]
    pub fn set_network_metadata_item(&self, network_ref: &str, key: &str, value: Value) -> Result<Value> {
        self.set_metadata(&format!("/networks/{}/metadata/{}", network_ref, key), value)
    }

    #[instrument(skip(self), fields(network = %network_ref, key = %key))]
    pub fn delete_network_metadata_item(&self, network_ref: &str, key: &str) -> Result<Value> {
        self.value(
            Method::Delete,
            &format!("/networks/{}/metadata/{}", network_ref, key),
            Body::Empty,
        )
    }

    /// Ping `address` from inside the network.
    #[instrument(skip(self), fields(network = %network_ref, address = %address))]
    pub fn ping(&self, network_ref: &str, address: &str) -> Result<Value> {
        self.value(
            Method::Get,
            &format!("/networks/{}/ping/{}", network_ref, address),
            Body::Empty,
        )
    }

    // =========================================================================
    // Interfaces and labels
    // =========================================================================

    #[instrument(skip(self), fields(interface = %interface_uuid))]
    pub fn get_interface(&self, interface_uuid: &str) -> Result<Interface> {
        self.get(&format!("/interfaces/{}", interface_uuid))
    }

    /// Assign a floating address to an interface.
    #[instrument(skip(self), fields(interface = %interface_uuid))]
    pub fn float_interface(&self, interface_uuid: &str) -> Result<Value> {
        info!("Floating interface");
        self.value(
            Method::Post,
            &format!("/interfaces/{}/float", interface_uuid),
            Body::Empty,
        )
    }

    #[instrument(skip(self), fields(interface = %interface_uuid))]
    pub fn defloat_interface(&self, interface_uuid: &str) -> Result<Value> {
        info!("Removing floating address from interface");
        self.value(
            Method::Post,
            &format!("/interfaces/{}/defloat", interface_uuid),
            Body::Empty,
        )
    }

    /// Point label `label_name` at `blob_uuid`.
    #[instrument(skip(self), fields(label = %label_name, blob = %blob_uuid))]
    pub fn update_label(&self, label_name: &str, blob_uuid: &str) -> Result<Value> {
        info!("Updating label");
        self.value(
            Method::Post,
            &format!("/label/{}", label_name),
            Body::Json(json!({"blob_uuid": blob_uuid})),
        )
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    /// Ask the cluster to fetch and cache `url`.
    #[instrument(skip(self, options), fields(url = %url))]
    pub fn cache_artifact(&self, url: &str, options: &ArtifactOptions) -> Result<Artifact> {
        info!("Caching artifact");
        self.json(
            Method::Post,
            "/artifacts",
            Body::Json(json!({
                "url": url,
                "shared": options.shared,
                "namespace": options.namespace,
            })),
        )
    }

    /// Turn a completed upload into a new version of artifact `name`.
    #[instrument(skip(self, options), fields(name = %name, upload = %upload_uuid))]
    pub fn upload_artifact(&self, name: &str, upload_uuid: &str, options: &ArtifactOptions) -> Result<Artifact> {
        info!("Creating artifact from upload");
        self.json(
            Method::Post,
            &format!("/artifacts/upload/{}", name),
            Body::Json(json!({
                "upload_uuid": upload_uuid,
                "source_url": options.source_url,
                "shared": options.shared,
                "namespace": options.namespace,
            })),
        )
    }

    /// Create a version of artifact `name` from an existing blob.
    #[instrument(skip(self, options), fields(name = %name, blob = %blob_uuid))]
    pub fn blob_artifact(&self, name: &str, blob_uuid: &str, options: &ArtifactOptions) -> Result<Artifact> {
        info!("Creating artifact from existing blob");
        self.json(
            Method::Post,
            &format!("/artifacts/upload/{}", name),
            Body::Json(json!({
                "blob_uuid": blob_uuid,
                "source_url": options.source_url,
                "shared": options.shared,
                "namespace": options.namespace,
            })),
        )
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn get_artifact(&self, artifact_ref: &str) -> Result<Artifact> {
        self.get(&format!("/artifacts/{}", artifact_ref))
    }

    /// List artifacts, optionally only those present on `node`.
    #[instrument(skip(self))]
    pub fn list_artifacts(&self, node: Option<&str>) -> Result<Vec<Artifact>> {
        self.json(Method::Get, "/artifacts", Body::Json(json!({"node": node})))
    }

    #[instrument(skip(self, filter), fields(artifact = %artifact_ref))]
    pub fn get_artifact_events(&self, artifact_ref: &str, filter: &EventFilter) -> Result<Vec<Event>> {
        self.events(&format!("/artifacts/{}/events", artifact_ref), filter)
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn get_artifact_versions(&self, artifact_ref: &str) -> Result<Vec<Value>> {
        self.get(&format!("/artifacts/{}/versions", artifact_ref))
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn set_artifact_max_versions(&self, artifact_ref: &str, max_versions: u32) -> Result<Value> {
        self.value(
            Method::Post,
            &format!("/artifacts/{}/versions", artifact_ref),
            Body::Json(json!({"max_versions": max_versions})),
        )
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn delete_artifact(&self, artifact_ref: &str) -> Result<Value> {
        info!("Deleting artifact");
        self.value(
            Method::Delete,
            &format!("/artifacts/{}", artifact_ref),
            Body::Empty,
        )
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref, version = version_id))]
    pub fn delete_artifact_version(&self, artifact_ref: &str, version_id: u64) -> Result<Value> {
        info!("Deleting artifact version");
        self.value(
            Method::Delete,
            &format!("/artifacts/{}/versions/{}", artifact_ref, version_id),
            Body::Empty,
        )
    }

    /// Make an artifact visible to every namespace.
    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn share_artifact(&self, artifact_ref: &str) -> Result<Value> {
        self.value(
            Method::Post,
            &format!("/artifacts/{}/share", artifact_ref),
            Body::Empty,
        )
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn unshare_artifact(&self, artifact_ref: &str) -> Result<Value> {
        self.value(
            Method::Post,
            &format!("/artifacts/{}/unshare", artifact_ref),
            Body::Empty,
        )
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref))]
    pub fn get_artifact_metadata(&self, artifact_ref: &str) -> Result<Metadata> {
        self.require_capability(capabilities::ARTIFACT_METADATA)?;
        self.get(&format!("/artifacts/{}/metadata", artifact_ref))
    }

    #[instrument(skip(self, value), fields(artifact = %artifact_ref, key = %key))]
    pub fn set_artifact_metadata_item(&self, artifact_ref: &str, key: &str, value: Value) -> Result<Value> {
        self.require_capability(capabilities::ARTIFACT_METADATA)?;
        self.set_metadata(&format!("/artifacts/{}/metadata/{}", artifact_ref, key), value)
    }

    #[instrument(skip(self), fields(artifact = %artifact_ref, key = %key))]
    pub fn delete_artifact_metadata_item(&self, artifact_ref: &str, key: &str) -> Result<Value> {
        self.require_capability(capabilities::ARTIFACT_METADATA)?;
        self.value(
            Method::Delete,
            &format!("/artifacts/{}/metadata/{}", artifact_ref, key),
            Body::Empty,
        )
    }

    // =========================================================================
    // Blobs and uploads
    // =========================================================================

    /// List blobs, optionally only those present on `node`.
    #[instrument(skip(self))]
    pub fn list_blobs(&self, node: Option<&str>) -> Result<Vec<Blob>> {
        self.json(Method::Get, "/blobs", Body::Json(json!({"node": node})))
    }

    #[instrument(skip(self), fields(blob = %blob_uuid))]
    pub fn get_blob(&self, blob_uuid: &str) -> Result<Blob> {
        self.get(&format!("/blobs/{}", blob_uuid))
    }

    /// Blob whose content hashes to `sha512`, if the cluster has one.
    #[instrument(skip(self))]
    pub fn find_blob_by_sha512(&self, sha512: &str) -> Result<Option<Blob>> {
        match self.value(
            Method::Get,
            &format!("/blob_checksums/sha512/{}", sha512),
            Body::Empty,
        ) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(serde_json::from_value(value)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stream blob data from `offset`, at most `window` bytes when given.
    #[instrument(skip(self), fields(blob = %blob_uuid))]
    pub fn blob_data(
        &self,
        blob_uuid: &str,
        offset: u64,
        window: Option<u64>,
    ) -> Result<Box<dyn Read + Send>> {
        let response = self.call_with(
            Method::Get,
            &format!("/blobs/{}/data", blob_uuid),
            Body::Empty,
            &[("Range", range_header(offset, window))],
        )?;
        Ok(response.body)
    }

    /// Start a new upload buffer on the server.
    #[instrument(skip(self))]
    pub fn create_upload(&self) -> Result<Upload> {
        self.json(Method::Post, "/upload", Body::Empty)
    }

    /// Append `data` to an upload; returns the server's running total.
    #[instrument(skip(self, data), fields(upload = %upload_uuid, bytes = data.len()))]
    pub fn send_upload(&self, upload_uuid: &str, data: &[u8]) -> Result<u64> {
        let total = self.value(
            Method::Post,
            &format!("/upload/{}", upload_uuid),
            Body::Binary(data.to_vec()),
        )?;
        total.as_u64().ok_or_else(|| {
            SdkError::UnexpectedResponse(format!("upload total is not a byte count: {}", total))
        })
    }

    /// Discard everything in an upload after `offset`.
    #[instrument(skip(self), fields(upload = %upload_uuid))]
    pub fn truncate_upload(&self, upload_uuid: &str, offset: u64) -> Result<()> {
        self.call(
            Method::Post,
            &format!("/upload/{}/truncate/{}", upload_uuid, offset),
            Body::Empty,
        )?;
        Ok(())
    }

    /// SHA-512 of `source` and the matching blob, when the server can look
    /// blobs up by hash. The reader is rewound to where it started.
    pub fn find_existing_blob<R, O>(&self, source: &mut R, observer: &mut O) -> Result<Option<Blob>>
    where
        R: Read + Seek + ?Sized,
        O: TransferObserver + ?Sized,
    {
        if !self.has_capability(capabilities::BLOB_SEARCH_BY_HASH)? {
            return Ok(None);
        }
        let start = source.stream_position()?;
        let digest = transfer::sha512_hex(source, &mut |n: u64| observer.checksum_progress(n))?;
        source.seek(SeekFrom::Start(start))?;
        debug!(sha512 = %digest, "searching for a blob with this hash");
        self.find_blob_by_sha512(&digest)
    }

    /// Store the rest of `source` as a new version of artifact `name`.
    ///
    /// When the server can search blobs by hash and already holds identical
    /// content, that blob is reused and nothing is uploaded.
    #[instrument(skip(self, source, options, observer), fields(name = %name))]
    pub fn upload_artifact_from_reader<R, O>(
        &self,
        name: &str,
        source: &mut R,
        options: &ArtifactOptions,
        observer: &mut O,
    ) -> Result<UploadedArtifact>
    where
        R: Read + Seek + ?Sized,
        O: TransferObserver + ?Sized,
    {
        if let Some(blob) = self.find_existing_blob(source, observer)? {
            info!(blob = %blob.uuid, "Recycling existing blob");
            observer.blob_reused(&blob.uuid);
            let artifact = self.blob_artifact(name, &blob.uuid, options)?;
            return Ok(UploadedArtifact {
                artifact,
                reused_blob: Some(blob.uuid),
                bytes_sent: 0,
            });
        }

        let upload = self.create_upload()?;
        info!(upload = %upload.uuid, node = ?upload.node, "Uploading");
        let start = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(start))?;
        let expected = end.saturating_sub(start);
        observer.transfer_started(Some(expected));

        let mut sink = RemoteUpload::new(self, upload.uuid.clone());
        let bytes_sent = transfer::upload(
            self.clock.as_ref(),
            source,
            &mut sink,
            &mut |n: u64| observer.transfer_progress(n),
        )?;
        if bytes_sent != expected {
            return Err(SdkError::Integrity {
                context: format!("upload of {}", name),
                expected,
                actual: bytes_sent,
            });
        }

        let artifact = self.upload_artifact(name, &upload.uuid, options)?;
        Ok(UploadedArtifact {
            artifact,
            reused_blob: None,
            bytes_sent,
        })
    }

    /// Write the current version of an artifact into `sink`.
    #[instrument(skip(self, sink, observer), fields(artifact = %artifact_ref))]
    pub fn download_artifact_to_writer<W, O>(
        &self,
        artifact_ref: &str,
        sink: &mut W,
        observer: &mut O,
    ) -> Result<u64>
    where
        W: Write + ?Sized,
        O: TransferObserver + ?Sized,
    {
        let artifact = self.get_artifact(artifact_ref)?;
        if let Some(version) = artifact.current_version() {
            return self.download_blob_sized(&version.uuid, version.size, sink, observer);
        }
        let blob_uuid = artifact.blob_uuid.ok_or_else(|| {
            SdkError::UnexpectedResponse(format!("artifact {} has no versions", artifact_ref))
        })?;
        self.download_blob_to_writer(&blob_uuid, sink, observer)
    }

    /// Write a blob into `sink`.
    #[instrument(skip(self, sink, observer), fields(blob = %blob_uuid))]
    pub fn download_blob_to_writer<W, O>(&self, blob_uuid: &str, sink: &mut W, observer: &mut O) -> Result<u64>
    where
        W: Write + ?Sized,
        O: TransferObserver + ?Sized,
    {
        let size = self.get_blob(blob_uuid)?.size.ok_or_else(|| {
            SdkError::UnexpectedResponse(format!("blob {} has no size", blob_uuid))
        })?;
        self.download_blob_sized(blob_uuid, size, sink, observer)
    }

    fn download_blob_sized<W, O>(&self, blob_uuid: &str, size: u64, sink: &mut W, observer: &mut O) -> Result<u64>
    where
        W: Write + ?Sized,
        O: TransferObserver + ?Sized,
    {
        let window = if self.has_capability(capabilities::BLOB_RANGE_LIMIT)? {
            Some(RANGE_WINDOW)
        } else {
            None
        };
        info!(blob = %blob_uuid, size, "Downloading");
        observer.transfer_started(Some(size));
        let mut source = RemoteBlob::new(self, blob_uuid);
        transfer::download(&mut source, sink, size, window, &mut |n: u64| {
            observer.transfer_progress(n)
        })
    }

    // =========================================================================
    // Namespaces, nodes, admin
    // =========================================================================

    #[instrument(skip(self))]
    pub fn list_namespaces(&self) -> Result<Vec<Value>> {
        self.get("/auth/namespaces")
    }

    #[instrument(skip(self))]
    pub fn create_namespace(&self, namespace: &str) -> Result<Value> {
        info!("Creating namespace");
        self.value(
            Method::Post,
            "/auth/namespaces",
            Body::Json(json!({"namespace": namespace})),
        )
    }

    /// Delete a namespace, the client's own when `None`. The server refuses
    /// while resources in it are still being torn down; that is retried
    /// until the strategy deadline.
    #[instrument(skip(self))]
    pub fn delete_namespace(&self, namespace: Option<&str>) -> Result<()> {
        let namespace = namespace
            .or(self.config.namespace.as_deref())
            .ok_or_else(|| SdkError::Config("no namespace to delete".to_string()))?;
        info!(namespace = %namespace, "Deleting namespace");
        self.call(
            Method::Delete,
            &format!("/auth/namespaces/{}", namespace),
            Body::Empty,
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get_namespace_keynames(&self, namespace: &str) -> Result<Vec<String>> {
        self.get(&format!("/auth/namespaces/{}/keys", namespace))
    }

    #[instrument(skip(self, key))]
    pub fn add_namespace_key(&self, namespace: &str, key_name: &str, key: &str) -> Result<Value> {
        info!("Adding namespace key");
        self.value(
            Method::Post,
            &format!("/auth/namespaces/{}/keys", namespace),
            Body::Json(json!({"key_name": key_name, "key": key})),
        )
    }

    #[instrument(skip(self))]
    pub fn delete_namespace_key(&self, namespace: &str, key_name: &str) -> Result<()> {
        info!("Deleting namespace key");
        self.call(
            Method::Delete,
            &format!("/auth/namespaces/{}/keys/{}", namespace, key_name),
            Body::Empty,
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get_namespace_metadata(&self, namespace: &str) -> Result<Metadata> {
        self.get(&format!("/auth/namespaces/{}/metadata", namespace))
    }

    #[instrument(skip(self, value))]
    pub fn set_namespace_metadata_item(&self, namespace: &str, key: &str, value: Value) -> Result<Value> {
        self.set_metadata(&format!("/auth/namespaces/{}/metadata/{}", namespace, key), value)
    }

    #[instrument(skip(self))]
    pub fn delete_namespace_metadata_item(&self, namespace: &str, key: &str) -> Result<Value> {
        self.value(
            Method::Delete,
            &format!("/auth/namespaces/{}/metadata/{}", namespace, key),
            Body::Empty,
        )
    }

    #[instrument(skip(self))]
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.get("/nodes")
    }

    /// Locks currently held in the cluster.
    #[instrument(skip(self))]
    pub fn get_existing_locks(&self) -> Result<Value> {
        self.value(Method::Get, "/admin/locks", Body::Empty)
    }

    // =========================================================================
    // Agent operations
    // =========================================================================

    #[instrument(skip(self), fields(operation = %operation_uuid))]
    pub fn get_agent_operation(&self, operation_uuid: &str) -> Result<AgentOperation> {
        self.get(&format!("/agentoperations/{}", operation_uuid))
    }

    /// Wait for an agent operation to finish executing.
    #[instrument(skip(self), fields(operation = %operation_uuid))]
    pub fn await_agent_operation(&self, operation_uuid: &str) -> Result<Awaited<AgentOperation>> {
        let op = PendingOperation::new(operation_uuid, &AGENT_OPERATION);
        let awaited = wait::poll_until_settled(self.clock.as_ref(), &op, self.config.async_strategy, |r| {
            self.value(Method::Get, &format!("/agentoperations/{}", r), Body::Empty)
        })?;
        Ok(awaited.try_map(serde_json::from_value)?)
    }
}

/// Decode a JSON body; an empty body is `null`.
fn parse_value(response: &HttpResponse) -> Result<Value> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    trace!(body = %response.text(), "response body");
    Ok(serde_json::from_slice(&response.body)?)
}

/// Server-side upload buffer, as seen by the upload engine.
#[derive(Debug)]
pub struct RemoteUpload<'a> {
    client: &'a StratusClient,
    upload_uuid: String,
}

impl<'a> RemoteUpload<'a> {
    pub fn new(client: &'a StratusClient, upload_uuid: impl Into<String>) -> Self {
        Self {
            client,
            upload_uuid: upload_uuid.into(),
        }
    }

    pub fn upload_uuid(&self) -> &str {
        &self.upload_uuid
    }
}

impl UploadSink for RemoteUpload<'_> {
    fn send(&mut self, chunk: &[u8]) -> Result<u64> {
        self.client.send_upload(&self.upload_uuid, chunk)
    }

    fn truncate(&mut self, offset: u64) -> Result<()> {
        self.client.truncate_upload(&self.upload_uuid, offset)
    }
}

/// Blob data, as seen by the download engine.
#[derive(Debug)]
pub struct RemoteBlob<'a> {
    client: &'a StratusClient,
    blob_uuid: String,
}

impl<'a> RemoteBlob<'a> {
    pub fn new(client: &'a StratusClient, blob_uuid: impl Into<String>) -> Self {
        Self {
            client,
            blob_uuid: blob_uuid.into(),
        }
    }
}

impl BlobSource for RemoteBlob<'_> {
    fn open(&mut self, offset: u64, window: Option<u64>) -> Result<Box<dyn Read + Send>> {
        self.client.blob_data(&self.blob_uuid, offset, window)
    }
}
