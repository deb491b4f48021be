// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource records and request options for the control-plane API.
//!
//! Records keep the fields the client reasons about as typed members and
//! carry everything else the server sends in `extra`, so a newer server never
//! breaks deserialization and nothing is lost when a record is printed.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::SdkError;
use crate::wait::Awaited;

/// Free-form key/value metadata attached to a resource.
pub type Metadata = BTreeMap<String, Value>;

// ============================================================================
// Instances
// ============================================================================

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub cpus: Option<u32>,
    /// Memory in MB.
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub power_state: Option<String>,
    #[serde(default)]
    pub disk_spec: Vec<DiskSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Instance {
    /// True when the instance settled in a failure state.
    pub fn is_error(&self) -> bool {
        self.state
            .as_deref()
            .is_some_and(|s| s == "error" || s.ends_with("-error"))
    }
}

/// A disk to attach at creation time.
///
/// Short form: `SIZE[@BASE]`, size in GB, base an image URL or label.
/// Long form: `key=value` pairs separated by commas, e.g.
/// `size=8,base=debian:11,bus=virtio,type=disk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub bus: Option<String>,
    #[serde(rename = "type", default = "default_disk_type")]
    pub disk_type: String,
}

fn default_disk_type() -> String {
    "disk".to_string()
}

impl DiskSpec {
    pub fn new(size: u64) -> Self {
        Self {
            size: Some(size),
            base: None,
            bus: None,
            disk_type: default_disk_type(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Parse the short `SIZE[@BASE]` form.
    pub fn parse_short(spec: &str) -> Result<Self, SdkError> {
        let (size, base) = split_at_sign(spec);
        let size: u64 = size
            .trim()
            .parse()
            .map_err(|_| SdkError::Config(format!("disk size is not an integer: {}", spec)))?;
        let disk = DiskSpec::new(size);
        Ok(match base {
            Some(base) => disk.with_base(base),
            None => disk,
        })
    }

    /// Parse the long `key=value,...` form.
    pub fn parse_long(spec: &str) -> Result<Self, SdkError> {
        let mut disk = DiskSpec {
            size: None,
            base: None,
            bus: None,
            disk_type: default_disk_type(),
        };
        for (key, value) in key_values(spec, "disk")? {
            match key {
                "size" => {
                    disk.size = Some(value.parse().map_err(|_| {
                        SdkError::Config(format!("disk size is not an integer: {}", value))
                    })?)
                }
                "base" => disk.base = Some(value.to_string()),
                "bus" => disk.bus = Some(value.to_string()),
                "type" => disk.disk_type = value.to_string(),
                other => {
                    return Err(SdkError::Config(format!(
                        "unknown disk specification key: {}",
                        other
                    )));
                }
            }
        }
        Ok(disk)
    }
}

/// A network interface to create with an instance.
///
/// Short form: `NETWORK[@ADDRESS]`. Long form: `key=value` pairs, e.g.
/// `network_uuid=...,address=10.0.0.5,model=e1000,float=true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub network_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub macaddress: Option<String>,
    #[serde(default = "default_nic_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub float: bool,
}

fn default_nic_model() -> String {
    "virtio".to_string()
}

impl NetworkSpec {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network_uuid: network.into(),
            address: None,
            macaddress: None,
            model: default_nic_model(),
            float: false,
        }
    }

    pub fn floated(mut self) -> Self {
        self.float = true;
        self
    }

    /// Parse the short `NETWORK[@ADDRESS]` form.
    pub fn parse_short(spec: &str) -> Result<Self, SdkError> {
        let (network, address) = split_at_sign(spec);
        if network.is_empty() {
            return Err(SdkError::Config(format!("network is empty: {}", spec)));
        }
        let mut nic = NetworkSpec::new(network);
        nic.address = address.map(str::to_string);
        Ok(nic)
    }

    /// Parse the long `key=value,...` form.
    pub fn parse_long(spec: &str) -> Result<Self, SdkError> {
        let mut nic = NetworkSpec::new("");
        for (key, value) in key_values(spec, "network")? {
            match key {
                "network_uuid" => nic.network_uuid = value.to_string(),
                "address" => nic.address = Some(value.to_string()),
                "macaddress" => nic.macaddress = Some(value.to_string()),
                "model" => nic.model = value.to_string(),
                "float" => nic.float = value.eq_ignore_ascii_case("true"),
                other => {
                    return Err(SdkError::Config(format!(
                        "unknown network specification key: {}",
                        other
                    )));
                }
            }
        }
        if nic.network_uuid.is_empty() {
            return Err(SdkError::Config(format!(
                "network specification has no network_uuid: {}",
                spec
            )));
        }
        Ok(nic)
    }
}

/// Emulated video card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSpec {
    pub model: String,
    /// Video memory in KB.
    pub memory: u64,
}

impl Default for VideoSpec {
    fn default() -> Self {
        Self {
            model: "cirrus".to_string(),
            memory: 16384,
        }
    }
}

impl FromStr for VideoSpec {
    type Err = SdkError;

    /// `model=qxl,memory=65536`; unset keys keep their defaults.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut video = VideoSpec::default();
        for (key, value) in key_values(spec, "video")? {
            match key {
                "model" => video.model = value.to_string(),
                "memory" => {
                    video.memory = value.parse().map_err(|_| {
                        SdkError::Config(format!("video memory is not an integer: {}", value))
                    })?
                }
                other => {
                    return Err(SdkError::Config(format!(
                        "unknown video specification key: {}",
                        other
                    )));
                }
            }
        }
        Ok(video)
    }
}

fn split_at_sign(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once('@') {
        Some((head, tail)) => (head, Some(tail)),
        None => (spec, None),
    }
}

fn key_values<'a>(spec: &'a str, what: &str) -> Result<Vec<(&'a str, &'a str)>, SdkError> {
    spec.split(',')
        .map(|elem| {
            elem.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    SdkError::Config(format!(
                        "error in {} specification, should be key=value: {}",
                        what, elem
                    ))
                })
        })
        .collect()
}

/// Options for creating an instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateInstanceOptions {
    pub name: String,
    pub cpus: u32,
    /// Memory in MB.
    pub memory: u64,
    #[serde(rename = "network")]
    pub networks: Vec<NetworkSpec>,
    #[serde(rename = "disk")]
    pub disks: Vec<DiskSpec>,
    pub ssh_key: Option<String>,
    /// Base64 encoded user data.
    pub user_data: Option<String>,
    pub namespace: Option<String>,
    pub video: VideoSpec,
    pub uefi: bool,
    pub secure_boot: bool,
    pub nvram_template: Option<String>,
    pub configdrive: Option<String>,
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placed_on: Option<String>,
}

impl CreateInstanceOptions {
    /// Create new options.
    pub fn new(name: impl Into<String>, cpus: u32, memory: u64) -> Self {
        Self {
            name: name.into(),
            cpus,
            memory,
            networks: Vec::new(),
            disks: Vec::new(),
            ssh_key: None,
            user_data: None,
            namespace: None,
            video: VideoSpec::default(),
            uefi: false,
            secure_boot: false,
            nvram_template: None,
            configdrive: None,
            metadata: None,
            placed_on: None,
        }
    }

    pub fn with_disk(mut self, disk: DiskSpec) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_network(mut self, nic: NetworkSpec) -> Self {
        self.networks.push(nic);
        self
    }

    pub fn with_ssh_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    /// Set user data from raw bytes; it is base64 encoded for the API.
    pub fn with_user_data(mut self, data: impl AsRef<[u8]>) -> Self {
        use base64::Engine;
        self.user_data = Some(base64::engine::general_purpose::STANDARD.encode(data));
        self
    }

    /// Set user data that is already base64 encoded.
    pub fn with_encoded_user_data(mut self, data: impl Into<String>) -> Self {
        self.user_data = Some(data.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_video(mut self, video: VideoSpec) -> Self {
        self.video = video;
        self
    }

    /// Boot with UEFI firmware. Secure boot implies UEFI.
    pub fn with_uefi(mut self, secure_boot: bool) -> Self {
        self.uefi = true;
        self.secure_boot = secure_boot;
        self
    }

    pub fn with_nvram_template(mut self, template: impl Into<String>) -> Self {
        self.nvram_template = Some(template.into());
        self
    }

    pub fn with_configdrive(mut self, configdrive: impl Into<String>) -> Self {
        self.configdrive = Some(configdrive.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Force placement on a specific node.
    pub fn with_placement(mut self, node: impl Into<String>) -> Self {
        self.placed_on = Some(node.into());
        self
    }
}

/// Options for snapshotting an instance's disks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Snapshot every disk instead of the first one.
    pub all: bool,
    pub device: Option<String>,
    /// Point this label at the new blob once it exists.
    pub label_name: Option<String>,
    /// Remove the snapshot artifact after labelling it.
    pub delete_snapshot_after_label: bool,
}

impl SnapshotOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_disks(mut self) -> Self {
        self.all = true;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>, delete_after: bool) -> Self {
        self.label_name = Some(label.into());
        self.delete_snapshot_after_label = delete_after;
        self
    }
}

/// One disk's entry in a snapshot response, keyed by device name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub blob_uuid: String,
    #[serde(default)]
    pub artifact_uuid: Option<String>,
    #[serde(default)]
    pub artifact_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A snapshot as listed for an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub blob_uuid: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a snapshot request produced and how far the blobs got.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotOutcome {
    /// Snapshot entries keyed by device name.
    pub devices: BTreeMap<String, SnapshotEntry>,
    /// Wait result for each new blob.
    pub blobs: Vec<AwaitedResource>,
    /// Label record, when a label was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Value>,
}

/// Wait result for one member of a set of resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwaitedResource {
    pub reference: String,
    pub result: Awaited<Value>,
}

impl From<(String, Awaited<Value>)> for AwaitedResource {
    fn from((reference, result): (String, Awaited<Value>)) -> Self {
        Self { reference, result }
    }
}

// ============================================================================
// Networks and interfaces
// ============================================================================

/// A virtual network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub netblock: Option<String>,
    #[serde(default)]
    pub provide_dhcp: Option<bool>,
    #[serde(default)]
    pub provide_nat: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options for allocating a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocateNetworkOptions {
    pub netblock: String,
    pub name: String,
    pub provide_dhcp: bool,
    pub provide_nat: bool,
    pub namespace: Option<String>,
}

impl AllocateNetworkOptions {
    /// DHCP and NAT are enabled by default.
    pub fn new(netblock: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            netblock: netblock.into(),
            name: name.into(),
            provide_dhcp: true,
            provide_nat: true,
            namespace: None,
        }
    }

    pub fn with_dhcp(mut self, enabled: bool) -> Self {
        self.provide_dhcp = enabled;
        self
    }

    pub fn with_nat(mut self, enabled: bool) -> Self {
        self.provide_nat = enabled;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// A network interface of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub uuid: String,
    #[serde(default)]
    pub network_uuid: Option<String>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub macaddr: Option<String>,
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub floating: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Artifacts, blobs and uploads
// ============================================================================

/// A named, versioned reference to blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub uuid: String,
    #[serde(default)]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Blob of the current version.
    #[serde(default)]
    pub blob_uuid: Option<String>,
    /// Index of the current version in `blobs`.
    #[serde(default)]
    pub index: Option<u64>,
    /// Versions, keyed by index.
    #[serde(default)]
    pub blobs: BTreeMap<String, ArtifactVersion>,
    #[serde(default)]
    pub max_versions: Option<u32>,
    #[serde(default)]
    pub shared: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Artifact {
    /// The version `index` points at.
    pub fn current_version(&self) -> Option<&ArtifactVersion> {
        self.index.and_then(|i| self.blobs.get(&i.to_string()))
    }
}

/// One version of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub uuid: String,
    #[serde(default)]
    pub size: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where an artifact's data comes from when it is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactOptions {
    pub source_url: Option<String>,
    pub shared: bool,
    pub namespace: Option<String>,
}

impl ArtifactOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Immutable stored data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub uuid: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub sha512: Option<String>,
    #[serde(default)]
    pub reference_count: Option<u64>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A server-side upload buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub uuid: String,
    /// Node holding the buffer.
    #[serde(default)]
    pub node: Option<String>,
}

/// Result of storing local data as an artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedArtifact {
    pub artifact: Artifact,
    /// Existing blob reused instead of uploading, if one matched.
    pub reused_blob: Option<String>,
    pub bytes_sent: u64,
}

// ============================================================================
// Events, nodes, agent operations
// ============================================================================

/// Filter for event listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.event_type.is_none() && self.limit.is_none()
    }
}

/// An audit event on a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sent as fractional seconds since the epoch.
    #[serde(deserialize_with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn epoch_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(D::Error::custom);
    }
    let secs = value
        .as_f64()
        .ok_or_else(|| D::Error::custom("timestamp is neither a number nor a string"))?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", secs)))
}

/// A hypervisor or network node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(alias = "fqdn")]
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Commands queued for the in-guest agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOperation {
    pub uuid: String,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub commands: Vec<Value>,
    #[serde(default)]
    pub results: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
