// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stratus Control CLI
//!
//! Command line front end for the stratus control plane. Every command prints
//! its result as JSON on stdout; logs and progress bars go to stderr.
//!
//! Usage:
//!   stratus-ctl [--apiurl <url>] [--namespace <ns>] [--key <key>]
//!               [--async <continue|pause|block>] [-v] <group> <command> [options]
//!
//! Credentials come from the flags, then `STRATUS_*` environment variables,
//! then `~/.stratus`, then `/etc/stratus/stratus.json`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use stratus_client::{
    AllocateNetworkOptions, ApiErrorKind, ArtifactOptions, AsyncStrategy, Awaited, ClientConfig,
    CreateInstanceOptions, DiskSpec, EventFilter, NetworkSpec, SdkError, SnapshotOptions,
    StratusClient, TransferObserver, VideoSpec,
};

#[derive(Debug, Parser)]
#[command(
    name = "stratus-ctl",
    version,
    about = "Manage instances, networks and artifacts on a stratus cluster",
    propagate_version = true
)]
struct Cli {
    /// Base URL of the API server.
    #[arg(long, global = true, value_name = "URL")]
    apiurl: Option<String>,

    /// Namespace to authenticate as.
    #[arg(long = "namespace", global = true, value_name = "NAMESPACE")]
    auth_namespace: Option<String>,

    /// Key for the namespace.
    #[arg(long = "key", global = true, value_name = "KEY")]
    auth_key: Option<String>,

    /// How long to wait for asynchronous operations.
    #[arg(long = "async", global = true, value_name = "STRATEGY")]
    async_strategy: Option<AsyncStrategy>,

    /// Log requests and waits to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Instance commands.
    #[command(subcommand)]
    Instance(InstanceCommand),
    /// Network commands.
    #[command(subcommand)]
    Network(NetworkCommand),
    /// Network interface commands.
    #[command(subcommand)]
    Interface(InterfaceCommand),
    /// Artifact commands.
    #[command(subcommand)]
    Artifact(ArtifactCommand),
    /// Blob commands.
    #[command(subcommand)]
    Blob(BlobCommand),
    /// Namespace commands.
    #[command(subcommand)]
    Namespace(NamespaceCommand),
    /// Node commands.
    #[command(subcommand)]
    Node(NodeCommand),
    /// Label commands.
    #[command(subcommand)]
    Label(LabelCommand),
    /// Agent operation commands.
    #[command(subcommand)]
    AgentOperation(AgentOperationCommand),
    /// Cluster administration.
    #[command(subcommand)]
    Admin(AdminCommand),
    /// List optional features of the API server.
    Capabilities,
}

/// Metadata commands shared by every resource that carries metadata.
#[derive(Debug, Subcommand)]
enum MetadataCommand {
    /// Show all metadata.
    Get,
    /// Set a key. The value is parsed as JSON, or kept as a string.
    Set { key: String, value: String },
    /// Delete a key.
    Delete { key: String },
}

#[derive(Debug, Args)]
struct EventArgs {
    /// Only events of this type.
    #[arg(long = "type", value_name = "TYPE")]
    event_type: Option<String>,
    /// At most this many events.
    #[arg(long)]
    limit: Option<u32>,
}

impl EventArgs {
    fn filter(&self) -> EventFilter {
        let mut filter = EventFilter::new();
        if let Some(event_type) = &self.event_type {
            filter = filter.with_type(event_type.clone());
        }
        if let Some(limit) = self.limit {
            filter = filter.with_limit(limit);
        }
        filter
    }
}

#[derive(Debug, Args)]
struct CreateInstanceArgs {
    name: String,
    cpus: u32,
    /// Memory in MB.
    memory: u64,
    /// Disk as SIZE[@BASE], size in GB.
    #[arg(short, long = "disk", value_parser = DiskSpec::parse_short)]
    disks: Vec<DiskSpec>,
    /// Disk as key=value pairs: size, base, bus, type.
    #[arg(long = "diskspec", value_parser = DiskSpec::parse_long)]
    disk_specs: Vec<DiskSpec>,
    /// Interface as NETWORK[@ADDRESS].
    #[arg(short, long = "network", value_parser = NetworkSpec::parse_short)]
    networks: Vec<NetworkSpec>,
    /// Interface with a floating address, as NETWORK[@ADDRESS].
    #[arg(short, long = "floated", value_parser = NetworkSpec::parse_short)]
    floated: Vec<NetworkSpec>,
    /// Interface as key=value pairs: network_uuid, address, macaddress, model, float.
    #[arg(long = "networkspec", value_parser = NetworkSpec::parse_long)]
    network_specs: Vec<NetworkSpec>,
    /// Video card as model=...,memory=...
    #[arg(long)]
    videospec: Option<VideoSpec>,
    /// File holding an SSH public key.
    #[arg(long, value_name = "PATH", conflicts_with = "sshkeydata")]
    sshkey: Option<PathBuf>,
    /// SSH public key.
    #[arg(long)]
    sshkeydata: Option<String>,
    /// File holding user data for cloud-init.
    #[arg(long, value_name = "PATH", conflicts_with = "encodeduserdata")]
    userdata: Option<PathBuf>,
    /// Base64 encoded user data.
    #[arg(long)]
    encodeduserdata: Option<String>,
    /// Boot with UEFI.
    #[arg(long)]
    uefi: bool,
    /// Enable secure boot; implies UEFI.
    #[arg(long)]
    secure_boot: bool,
    #[arg(long)]
    nvram_template: Option<String>,
    /// Config drive flavour, e.g. openstack-disk or none.
    #[arg(long)]
    configdrive: Option<String>,
    /// Start on this node.
    #[arg(long, value_name = "NODE")]
    placement: Option<String>,
    /// Create in this namespace instead of your own.
    #[arg(long)]
    target_namespace: Option<String>,
}

#[derive(Debug, Subcommand)]
enum InstanceCommand {
    /// List instances.
    List {
        /// Include deleted instances.
        #[arg(long)]
        all: bool,
    },
    /// Show an instance.
    Show { instance: String },
    /// Create an instance and wait for it to start.
    Create(Box<CreateInstanceArgs>),
    /// Delete instances.
    Delete {
        #[arg(required = true)]
        instances: Vec<String>,
        /// Return once the server accepted the request.
        #[arg(long)]
        no_wait: bool,
        #[arg(long)]
        target_namespace: Option<String>,
    },
    /// Delete every instance in a namespace.
    DeleteAll {
        #[arg(long)]
        target_namespace: Option<String>,
        /// Confirm deleting everything in the namespace.
        #[arg(long, required = true)]
        confirm: bool,
    },
    /// Snapshot disks of an instance.
    Snapshot {
        instance: String,
        /// Snapshot every disk.
        #[arg(long, conflicts_with = "device")]
        all: bool,
        /// Disk to snapshot, e.g. vda.
        #[arg(long)]
        device: Option<String>,
        /// Point this label at the new snapshot.
        #[arg(long, value_name = "LABEL")]
        label_name: Option<String>,
        /// Delete the snapshot artifact once the label is applied.
        #[arg(long, requires = "label_name")]
        delete_snapshot_after_label: bool,
    },
    /// List snapshots of an instance.
    Snapshots { instance: String },
    /// Reboot an instance.
    Reboot {
        instance: String,
        /// Power cycle instead of asking the guest.
        #[arg(long)]
        hard: bool,
    },
    PowerOn { instance: String },
    PowerOff { instance: String },
    Pause { instance: String },
    Unpause { instance: String },
    /// Show the event log of an instance.
    Events {
        instance: String,
        #[command(flatten)]
        filter: EventArgs,
    },
    /// List interfaces of an instance.
    Interfaces { instance: String },
    /// Instance metadata.
    Metadata {
        instance: String,
        #[command(subcommand)]
        action: MetadataCommand,
    },
    /// Print serial console output.
    Consoledata {
        instance: String,
        /// Only the last LENGTH bytes.
        #[arg(long)]
        length: Option<u64>,
    },
    /// Clear the serial console log.
    DeleteConsoledata { instance: String },
}

#[derive(Debug, Subcommand)]
enum NetworkCommand {
    /// List networks.
    List {
        #[arg(long)]
        all: bool,
    },
    Show { network: String },
    /// Allocate a network and wait for it to be created.
    Create {
        netblock: String,
        name: String,
        #[arg(long)]
        no_dhcp: bool,
        #[arg(long)]
        no_nat: bool,
        #[arg(long)]
        target_namespace: Option<String>,
    },
    /// Delete a network and wait for it to go away.
    Delete {
        network: String,
        #[arg(long)]
        target_namespace: Option<String>,
    },
    /// Delete every network in a namespace.
    DeleteAll {
        #[arg(long)]
        target_namespace: Option<String>,
        /// Wait for instances on the networks to be removed first.
        #[arg(long)]
        clean_wait: bool,
        #[arg(long, required = true)]
        confirm: bool,
    },
    Events {
        network: String,
        #[command(flatten)]
        filter: EventArgs,
    },
    Interfaces { network: String },
    Metadata {
        network: String,
        #[command(subcommand)]
        action: MetadataCommand,
    },
    /// Ping an address from inside the network.
    Ping { network: String, address: String },
}

#[derive(Debug, Subcommand)]
enum InterfaceCommand {
    Show { interface: String },
    /// Give an interface a floating address.
    Float { interface: String },
    /// Remove the floating address of an interface.
    Defloat { interface: String },
}

#[derive(Debug, Args)]
struct ShareArgs {
    /// Make the artifact visible to every namespace.
    #[arg(long)]
    shared: bool,
    /// Own the artifact in this namespace instead of your own.
    #[arg(long)]
    target_namespace: Option<String>,
}

impl ShareArgs {
    fn options(&self) -> ArtifactOptions {
        let options = ArtifactOptions::new().shared(self.shared);
        match &self.target_namespace {
            Some(ns) => options.with_namespace(ns.clone()),
            None => options,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ArtifactCommand {
    /// Ask the cluster to fetch and cache a URL.
    Cache {
        url: String,
        #[command(flatten)]
        share: ShareArgs,
    },
    /// Upload a local file as a new version of an artifact.
    Upload {
        name: String,
        source: PathBuf,
        /// Record this URL as the artifact's origin.
        #[arg(long)]
        source_url: Option<String>,
        #[command(flatten)]
        share: ShareArgs,
    },
    /// Download the current version of an artifact.
    Download { artifact: String, destination: PathBuf },
    Show { artifact: String },
    /// List artifacts.
    List {
        /// Only artifacts present on this node.
        #[arg(long)]
        node: Option<String>,
    },
    Events {
        artifact: String,
        #[command(flatten)]
        filter: EventArgs,
    },
    /// List versions of an artifact.
    Versions { artifact: String },
    /// Set how many versions to keep.
    MaxVersions { artifact: String, max_versions: u32 },
    Delete { artifact: String },
    DeleteVersion {
        artifact: String,
        #[arg(value_name = "VERSION")]
        version_id: u64,
    },
    Share { artifact: String },
    Unshare { artifact: String },
    Metadata {
        artifact: String,
        #[command(subcommand)]
        action: MetadataCommand,
    },
}

#[derive(Debug, Subcommand)]
enum BlobCommand {
    List {
        #[arg(long)]
        node: Option<String>,
    },
    Show { blob: String },
    /// Find a blob by the SHA-512 of its content.
    Search { sha512: String },
    Download { blob: String, destination: PathBuf },
}

#[derive(Debug, Subcommand)]
enum NamespaceCommand {
    List,
    Create { namespace: String },
    /// Delete a namespace; defaults to the one you authenticated as.
    Delete { namespace: Option<String> },
    /// List key names of a namespace.
    Keys { namespace: String },
    AddKey {
        namespace: String,
        key_name: String,
        key: String,
    },
    DeleteKey { namespace: String, key_name: String },
    Metadata {
        namespace: String,
        #[command(subcommand)]
        action: MetadataCommand,
    },
}

#[derive(Debug, Subcommand)]
enum NodeCommand {
    List,
}

#[derive(Debug, Subcommand)]
enum LabelCommand {
    /// Point a label at a blob.
    Update { label: String, blob: String },
}

#[derive(Debug, Subcommand)]
enum AgentOperationCommand {
    Show { operation: String },
    /// Wait for an agent operation to finish.
    Await { operation: String },
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    /// Show locks held in the cluster.
    Locks,
}

// ============================================================================
// Exit codes
// ============================================================================

/// An awaited resource settled in an error state.
const EXIT_RESOURCE_ERRORED: u8 = 1;

/// Distinct process exit code for each failure kind. 2 is left to clap for
/// usage errors.
fn exit_code(err: &SdkError) -> u8 {
    match err {
        SdkError::Config(_) => 3,
        SdkError::UnknownStrategy(_) => 4,
        SdkError::Connection(_) => 5,
        SdkError::Api { kind, .. } => match kind {
            ApiErrorKind::RequestMalformed => 10,
            ApiErrorKind::Unauthenticated => 11,
            ApiErrorKind::Unauthorized => 12,
            ApiErrorKind::NotFound => 13,
            ApiErrorKind::DependenciesNotReady => 14,
            ApiErrorKind::ResourceInUse => 15,
            ApiErrorKind::InternalServerError => 16,
            ApiErrorKind::InsufficientResources => 17,
            ApiErrorKind::UnexpectedStatus => 18,
        },
        SdkError::Serialization(_) => 20,
        SdkError::UnexpectedResponse(_) => 21,
        SdkError::Io(_) => 22,
        SdkError::Integrity { .. } => 23,
        SdkError::RetriesExhausted { .. } => 24,
        SdkError::StalledTransfer { .. } => 25,
        SdkError::CapabilityMissing(_) => 26,
    }
}

// ============================================================================
// Progress
// ============================================================================

const BAR_TEMPLATE: &str =
    "{prefix:>10.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

fn progress_bar(prefix: &'static str, total: Option<u64>) -> ProgressBar {
    let bar = match total {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    let bar = match ProgressStyle::with_template(BAR_TEMPLATE) {
        Ok(style) => bar.with_style(style.progress_chars("█▓▒░  ")),
        Err(_) => bar,
    };
    bar.set_prefix(prefix);
    bar
}

/// Progress bars on stderr for the phases of an artifact transfer.
struct ProgressBars {
    source_len: Option<u64>,
    checksum: Option<ProgressBar>,
    transfer: Option<ProgressBar>,
}

impl ProgressBars {
    fn new(source_len: Option<u64>) -> Self {
        Self {
            source_len,
            checksum: None,
            transfer: None,
        }
    }

    fn finish(self) {
        for bar in [self.checksum, self.transfer].into_iter().flatten() {
            bar.finish();
        }
    }
}

impl TransferObserver for ProgressBars {
    fn checksum_progress(&mut self, hashed: u64) {
        let len = self.source_len;
        self.checksum
            .get_or_insert_with(|| progress_bar("checksum", len))
            .set_position(hashed);
    }

    fn blob_reused(&mut self, blob_uuid: &str) {
        if let Some(bar) = self.checksum.take() {
            bar.finish_with_message(format!("reusing blob {}", blob_uuid));
        }
    }

    fn transfer_started(&mut self, total: Option<u64>) {
        if let Some(bar) = self.checksum.take() {
            bar.finish();
        }
        self.transfer = Some(progress_bar("transfer", total));
    }

    fn transfer_progress(&mut self, transferred: u64) {
        if let Some(bar) = &self.transfer {
            bar.set_position(transferred);
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(io::stderr)
        .init();
}

fn build_client(cli: &Cli) -> Result<StratusClient, SdkError> {
    let mut config = ClientConfig::discover()?;
    if let Some(url) = &cli.apiurl {
        config = config.with_base_url(url.clone());
    }
    if let Some(namespace) = &cli.auth_namespace {
        config = config.with_namespace(namespace.clone());
    }
    if let Some(key) = &cli.auth_key {
        config = config.with_key(key.clone());
    }
    if let Some(strategy) = cli.async_strategy {
        config = config.with_async_strategy(strategy);
    }
    StratusClient::new(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let client = match build_client(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(exit_code(&e));
        }
    };

    match execute_command(&client, cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(message) = e.server_message() {
                eprintln!("Server said: {}", message);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode, SdkError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::SUCCESS)
}

/// Print an awaited result; a resource that settled in error fails the command.
fn print_awaited<T: Serialize>(awaited: &Awaited<T>) -> Result<ExitCode, SdkError> {
    print_json(awaited)?;
    if awaited.is_errored() {
        Ok(ExitCode::from(EXIT_RESOURCE_ERRORED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Metadata values are JSON when they parse as JSON, strings otherwise.
fn metadata_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn execute_command(client: &StratusClient, cmd: Command) -> Result<ExitCode, SdkError> {
    match cmd {
        Command::Instance(cmd) => execute_instance(client, cmd),
        Command::Network(cmd) => execute_network(client, cmd),
        Command::Interface(cmd) => match cmd {
            InterfaceCommand::Show { interface } => print_json(&client.get_interface(&interface)?),
            InterfaceCommand::Float { interface } => {
                print_json(&client.float_interface(&interface)?)
            }
            InterfaceCommand::Defloat { interface } => {
                print_json(&client.defloat_interface(&interface)?)
            }
        },
        Command::Artifact(cmd) => execute_artifact(client, cmd),
        Command::Blob(cmd) => match cmd {
            BlobCommand::List { node } => print_json(&client.list_blobs(node.as_deref())?),
            BlobCommand::Show { blob } => print_json(&client.get_blob(&blob)?),
            BlobCommand::Search { sha512 } => print_json(&client.find_blob_by_sha512(&sha512)?),
            BlobCommand::Download { blob, destination } => {
                let mut sink = BufWriter::new(File::create(&destination)?);
                let mut bars = ProgressBars::new(None);
                let written = client.download_blob_to_writer(&blob, &mut sink, &mut bars)?;
                bars.finish();
                print_json(&serde_json::json!({
                    "blob_uuid": blob,
                    "destination": destination,
                    "bytes": written,
                }))
            }
        },
        Command::Namespace(cmd) => execute_namespace(client, cmd),
        Command::Node(NodeCommand::List) => print_json(&client.list_nodes()?),
        Command::Label(LabelCommand::Update { label, blob }) => {
            print_json(&client.update_label(&label, &blob)?)
        }
        Command::AgentOperation(cmd) => match cmd {
            AgentOperationCommand::Show { operation } => {
                print_json(&client.get_agent_operation(&operation)?)
            }
            AgentOperationCommand::Await { operation } => {
                print_awaited(&client.await_agent_operation(&operation)?)
            }
        },
        Command::Admin(AdminCommand::Locks) => print_json(&client.get_existing_locks()?),
        Command::Capabilities => print_json(&client.capabilities()?),
    }
}

fn execute_instance(client: &StratusClient, cmd: InstanceCommand) -> Result<ExitCode, SdkError> {
    match cmd {
        InstanceCommand::List { all } => print_json(&client.list_instances(all)?),
        InstanceCommand::Show { instance } => print_json(&client.get_instance(&instance)?),
        InstanceCommand::Create(args) => {
            let options = create_options(*args)?;
            print_awaited(&client.create_instance(&options)?)
        }
        InstanceCommand::Delete {
            instances,
            no_wait,
            target_namespace,
        } => {
            let mut results = Vec::with_capacity(instances.len());
            let mut errored = false;
            for instance in instances {
                let result =
                    client.delete_instance(&instance, target_namespace.as_deref(), no_wait)?;
                errored |= result.is_errored();
                results.push(serde_json::json!({"instance": instance, "result": result}));
            }
            print_json(&results)?;
            Ok(if errored {
                ExitCode::from(EXIT_RESOURCE_ERRORED)
            } else {
                ExitCode::SUCCESS
            })
        }
        InstanceCommand::DeleteAll {
            target_namespace, ..
        } => print_json(&client.delete_all_instances(target_namespace.as_deref())?),
        InstanceCommand::Snapshot {
            instance,
            all,
            device,
            label_name,
            delete_snapshot_after_label,
        } => {
            let mut options = SnapshotOptions::new();
            if all {
                options = options.all_disks();
            }
            if let Some(device) = device {
                options = options.with_device(device);
            }
            if let Some(label) = label_name {
                options = options.with_label(label, delete_snapshot_after_label);
            }
            print_json(&client.snapshot_instance(&instance, &options)?)
        }
        InstanceCommand::Snapshots { instance } => {
            print_json(&client.get_instance_snapshots(&instance)?)
        }
        InstanceCommand::Reboot { instance, hard } => {
            print_json(&client.reboot_instance(&instance, hard)?)
        }
        InstanceCommand::PowerOn { instance } => print_json(&client.power_on_instance(&instance)?),
        InstanceCommand::PowerOff { instance } => {
            print_json(&client.power_off_instance(&instance)?)
        }
        InstanceCommand::Pause { instance } => print_json(&client.pause_instance(&instance)?),
        InstanceCommand::Unpause { instance } => print_json(&client.unpause_instance(&instance)?),
        InstanceCommand::Events { instance, filter } => {
            print_json(&client.get_instance_events(&instance, &filter.filter())?)
        }
        InstanceCommand::Interfaces { instance } => {
            print_json(&client.get_instance_interfaces(&instance)?)
        }
        InstanceCommand::Metadata { instance, action } => match action {
            MetadataCommand::Get => print_json(&client.get_instance_metadata(&instance)?),
            MetadataCommand::Set { key, value } => print_json(
                &client.set_instance_metadata_item(&instance, &key, metadata_value(&value))?,
            ),
            MetadataCommand::Delete { key } => {
                print_json(&client.delete_instance_metadata_item(&instance, &key)?)
            }
        },
        InstanceCommand::Consoledata { instance, length } => {
            let data = client.get_console_data(&instance, length)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(data.as_bytes())?;
            stdout.flush()?;
            Ok(ExitCode::SUCCESS)
        }
        InstanceCommand::DeleteConsoledata { instance } => {
            client.delete_console_data(&instance)?;
            print_json(&serde_json::json!({"instance": instance, "consoledata": "deleted"}))
        }
    }
}

fn create_options(args: CreateInstanceArgs) -> Result<CreateInstanceOptions, SdkError> {
    let mut options = CreateInstanceOptions::new(args.name, args.cpus, args.memory);
    for disk in args.disks.into_iter().chain(args.disk_specs) {
        options = options.with_disk(disk);
    }
    let floated = args.floated.into_iter().map(NetworkSpec::floated);
    for nic in args.networks.into_iter().chain(floated).chain(args.network_specs) {
        options = options.with_network(nic);
    }
    if let Some(video) = args.videospec {
        options = options.with_video(video);
    }
    if let Some(path) = args.sshkey {
        options = options.with_ssh_key(std::fs::read_to_string(path)?.trim());
    } else if let Some(key) = args.sshkeydata {
        options = options.with_ssh_key(key);
    }
    if let Some(path) = args.userdata {
        options = options.with_user_data(std::fs::read(path)?);
    } else if let Some(encoded) = args.encodeduserdata {
        options = options.with_encoded_user_data(encoded);
    }
    if args.uefi || args.secure_boot {
        options = options.with_uefi(args.secure_boot);
    }
    if let Some(template) = args.nvram_template {
        options = options.with_nvram_template(template);
    }
    if let Some(configdrive) = args.configdrive {
        options = options.with_configdrive(configdrive);
    }
    if let Some(node) = args.placement {
        options = options.with_placement(node);
    }
    if let Some(ns) = args.target_namespace {
        options = options.with_namespace(ns);
    }
    Ok(options)
}

fn execute_network(client: &StratusClient, cmd: NetworkCommand) -> Result<ExitCode, SdkError> {
    match cmd {
        NetworkCommand::List { all } => print_json(&client.list_networks(all)?),
        NetworkCommand::Show { network } => print_json(&client.get_network(&network)?),
        NetworkCommand::Create {
            netblock,
            name,
            no_dhcp,
            no_nat,
            target_namespace,
        } => {
            let mut options = AllocateNetworkOptions::new(netblock, name)
                .with_dhcp(!no_dhcp)
                .with_nat(!no_nat);
            if let Some(ns) = target_namespace {
                options = options.with_namespace(ns);
            }
            print_awaited(&client.allocate_network(&options)?)
        }
        NetworkCommand::Delete {
            network,
            target_namespace,
        } => print_awaited(&client.delete_network(&network, target_namespace.as_deref())?),
        NetworkCommand::DeleteAll {
            target_namespace,
            clean_wait,
            ..
        } => print_json(&client.delete_all_networks(target_namespace.as_deref(), clean_wait)?),
        NetworkCommand::Events { network, filter } => {
            print_json(&client.get_network_events(&network, &filter.filter())?)
        }
        NetworkCommand::Interfaces { network } => {
            print_json(&client.get_network_interfaces(&network)?)
        }
        NetworkCommand::Metadata { network, action } => match action {
            MetadataCommand::Get => print_json(&client.get_network_metadata(&network)?),
            MetadataCommand::Set { key, value } => print_json(
                &client.set_network_metadata_item(&network, &key, metadata_value(&value))?,
            ),
            MetadataCommand::Delete { key } => {
                print_json(&client.delete_network_metadata_item(&network, &key)?)
            }
        },
        NetworkCommand::Ping { network, address } => print_json(&client.ping(&network, &address)?),
    }
}

fn execute_artifact(client: &StratusClient, cmd: ArtifactCommand) -> Result<ExitCode, SdkError> {
    match cmd {
        ArtifactCommand::Cache { url, share } => {
            print_json(&client.cache_artifact(&url, &share.options())?)
        }
        ArtifactCommand::Upload {
            name,
            source,
            source_url,
            share,
        } => {
            let mut file = File::open(&source)?;
            let mut options = share.options();
            if let Some(url) = source_url {
                options = options.with_source_url(url);
            }
            let mut bars = ProgressBars::new(Some(file.metadata()?.len()));
            let uploaded = client.upload_artifact_from_reader(&name, &mut file, &options, &mut bars)?;
            bars.finish();
            print_json(&uploaded)
        }
        ArtifactCommand::Download {
            artifact,
            destination,
        } => {
            let mut sink = BufWriter::new(File::create(&destination)?);
            let mut bars = ProgressBars::new(None);
            let written = client.download_artifact_to_writer(&artifact, &mut sink, &mut bars)?;
            bars.finish();
            print_json(&serde_json::json!({
                "artifact": artifact,
                "destination": destination,
                "bytes": written,
            }))
        }
        ArtifactCommand::Show { artifact } => print_json(&client.get_artifact(&artifact)?),
        ArtifactCommand::List { node } => print_json(&client.list_artifacts(node.as_deref())?),
        ArtifactCommand::Events { artifact, filter } => {
            print_json(&client.get_artifact_events(&artifact, &filter.filter())?)
        }
        ArtifactCommand::Versions { artifact } => {
            print_json(&client.get_artifact_versions(&artifact)?)
        }
        ArtifactCommand::MaxVersions {
            artifact,
            max_versions,
        } => print_json(&client.set_artifact_max_versions(&artifact, max_versions)?),
        ArtifactCommand::Delete { artifact } => print_json(&client.delete_artifact(&artifact)?),
        ArtifactCommand::DeleteVersion {
            artifact,
            version_id,
        } => {
            print_json(&client.delete_artifact_version(&artifact, version_id)?)
        }
        ArtifactCommand::Share { artifact } => print_json(&client.share_artifact(&artifact)?),
        ArtifactCommand::Unshare { artifact } => print_json(&client.unshare_artifact(&artifact)?),
        ArtifactCommand::Metadata { artifact, action } => match action {
            MetadataCommand::Get => print_json(&client.get_artifact_metadata(&artifact)?),
            MetadataCommand::Set { key, value } => print_json(
                &client.set_artifact_metadata_item(&artifact, &key, metadata_value(&value))?,
            ),
            MetadataCommand::Delete { key } => {
                print_json(&client.delete_artifact_metadata_item(&artifact, &key)?)
            }
        },
    }
}

fn execute_namespace(client: &StratusClient, cmd: NamespaceCommand) -> Result<ExitCode, SdkError> {
    match cmd {
        NamespaceCommand::List => print_json(&client.list_namespaces()?),
        NamespaceCommand::Create { namespace } => {
            print_json(&client.create_namespace(&namespace)?)
        }
        NamespaceCommand::Delete { namespace } => {
            client.delete_namespace(namespace.as_deref())?;
            print_json(&serde_json::json!({"namespace": namespace, "deleted": true}))
        }
        NamespaceCommand::Keys { namespace } => {
            print_json(&client.get_namespace_keynames(&namespace)?)
        }
        NamespaceCommand::AddKey {
            namespace,
            key_name,
            key,
        } => print_json(&client.add_namespace_key(&namespace, &key_name, &key)?),
        NamespaceCommand::DeleteKey {
            namespace,
            key_name,
        } => {
            client.delete_namespace_key(&namespace, &key_name)?;
            print_json(&serde_json::json!({"namespace": namespace, "key_name": key_name, "deleted": true}))
        }
        NamespaceCommand::Metadata { namespace, action } => match action {
            MetadataCommand::Get => print_json(&client.get_namespace_metadata(&namespace)?),
            MetadataCommand::Set { key, value } => print_json(
                &client.set_namespace_metadata_item(&namespace, &key, metadata_value(&value))?,
            ),
            MetadataCommand::Delete { key } => {
                print_json(&client.delete_namespace_metadata_item(&namespace, &key)?)
            }
        },
    }
}
