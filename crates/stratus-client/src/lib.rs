// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stratus Client SDK
//!
//! Blocking client for the stratus virtualization control plane.
//!
//! This crate wraps the control plane's REST API: instances, networks,
//! interfaces, artifacts, blobs, namespaces, nodes and agent operations.
//! Around the plain requests it carries the behaviour every caller needs:
//!
//! - Lazy token authentication, renewed once when the server rejects it
//! - Retries while the server reports that dependencies are not ready
//! - Waiting for asynchronous operations under an [`AsyncStrategy`]
//! - Resumable chunked uploads and downloads of artifact data
//!
//! # Example
//!
//! ```no_run
//! use stratus_client::{
//!     AsyncStrategy, ClientConfig, CreateInstanceOptions, DiskSpec, NetworkSpec, StratusClient,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::discover()?.with_async_strategy(AsyncStrategy::Block);
//! let client = StratusClient::new(config)?;
//!
//! let options = CreateInstanceOptions::new("web-1", 2, 2048)
//!     .with_disk(DiskSpec::new(20).with_base("debian:12"))
//!     .with_network(NetworkSpec::new("b3c5a9a4-6c1c-4c8e-9b7e-2a1f1d3c5e7f"));
//! let created = client.create_instance(&options)?;
//! println!("{}: {}", created.outcome(), created.as_ref().into_inner().uuid);
//!
//! for instance in client.list_instances(false)? {
//!     println!("{} {:?}", instance.uuid, instance.state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
mod client;
pub mod clock;
mod config;
mod error;
pub mod retry;
mod strategy;
pub mod transfer;
mod types;
pub mod wait;

pub use capabilities::Capabilities;
pub use client::{RemoteBlob, RemoteUpload, StratusClient, user_agent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ClientConfig, DEFAULT_API_URL, SYSTEM_CONFIG_PATH, USER_CONFIG_FILE, user_config_path,
};
pub use error::{ApiErrorKind, Result, SdkError};
pub use strategy::{AsyncStrategy, Deadline};
pub use transfer::TransferObserver;
pub use types::{
    AgentOperation, AllocateNetworkOptions, Artifact, ArtifactOptions, ArtifactVersion,
    AwaitedResource, Blob, CreateInstanceOptions, DiskSpec, Event, EventFilter, Instance,
    Interface, Metadata, Network, NetworkSpec, Node, Snapshot, SnapshotEntry, SnapshotOptions,
    SnapshotOutcome, Upload, UploadedArtifact, VideoSpec,
};
pub use wait::{Awaited, Lifecycle, PendingOperation};

pub use stratus_http::{HttpResponse, HttpTransport, Method};
