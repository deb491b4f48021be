// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the stratus client.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SdkError};
use crate::strategy::AsyncStrategy;

/// API address used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:13000";
/// System-wide credentials file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/stratus/stratus.json";
/// Per-user credentials file, relative to the home directory.
pub const USER_CONFIG_FILE: &str = ".stratus";

/// Configuration for the StratusClient.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the API, without a trailing slash.
    pub base_url: String,
    /// Namespace to authenticate as.
    pub namespace: Option<String>,
    /// Secret key for the namespace.
    pub key: Option<String>,
    /// How long async operations wait for the server.
    pub async_strategy: AsyncStrategy,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Socket read/write timeout, a hard bound below the async deadline.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            namespace: None,
            key: None,
            async_strategy: AsyncStrategy::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("namespace", &self.namespace)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("async_strategy", &self.async_strategy)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Contents of a credentials file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    apiurl: Option<String>,
    namespace: Option<String>,
    key: Option<String>,
}

/// Values that may come from several sources, earliest source wins.
#[derive(Debug, Default)]
struct Layered {
    apiurl: Option<String>,
    namespace: Option<String>,
    key: Option<String>,
}

impl Layered {
    fn is_complete(&self) -> bool {
        self.apiurl.is_some() && self.namespace.is_some() && self.key.is_some()
    }

    fn fill_from(&mut self, file: FileConfig) {
        if self.apiurl.is_none() {
            self.apiurl = file.apiurl;
        }
        if self.namespace.is_none() {
            self.namespace = file.namespace;
        }
        if self.key.is_none() {
            self.key = file.key;
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STRATUS_API_URL`: API base URL (default: "http://localhost:13000")
    /// - `STRATUS_NAMESPACE`: namespace to authenticate as
    /// - `STRATUS_KEY`: secret key for the namespace
    /// - `STRATUS_ASYNC`: continue, pause or block (default: "pause")
    /// - `STRATUS_CONNECT_TIMEOUT_SECS`: connection timeout (default: 10)
    /// - `STRATUS_REQUEST_TIMEOUT_SECS`: socket timeout (default: 300)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let layered = Layered {
            apiurl: lookup("STRATUS_API_URL"),
            namespace: lookup("STRATUS_NAMESPACE"),
            key: lookup("STRATUS_KEY"),
        };
        Self::build(layered, &lookup)
    }

    /// Environment first, then `~/.stratus`, then `/etc/stratus/stratus.json`.
    ///
    /// File values only fill what earlier sources left unset. The system file
    /// is skipped when it is not readable by the current user.
    pub fn discover() -> Result<Self> {
        let user_file = user_config_path();
        Self::discover_with(
            |name| std::env::var(name).ok(),
            user_file.as_deref(),
            Path::new(SYSTEM_CONFIG_PATH),
        )
    }

    /// [`discover`](Self::discover) with explicit sources.
    pub fn discover_with(
        lookup: impl Fn(&str) -> Option<String>,
        user_file: Option<&Path>,
        system_file: &Path,
    ) -> Result<Self> {
        let mut layered = Layered {
            apiurl: lookup("STRATUS_API_URL"),
            namespace: lookup("STRATUS_NAMESPACE"),
            key: lookup("STRATUS_KEY"),
        };

        if !layered.is_complete() {
            if let Some(path) = user_file {
                if let Some(file) = read_file_config(path, false)? {
                    debug!(path = %path.display(), "loaded user configuration");
                    layered.fill_from(file);
                }
            }
        }
        if !layered.is_complete() {
            if let Some(file) = read_file_config(system_file, true)? {
                debug!(path = %system_file.display(), "loaded system configuration");
                layered.fill_from(file);
            }
        }

        Self::build(layered, &lookup)
    }

    /// Load a single credentials file on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = read_file_config(path, false)?.ok_or_else(|| {
            SdkError::Config(format!("configuration file {} not found", path.display()))
        })?;
        let mut layered = Layered::default();
        layered.fill_from(file);
        Self::build(layered, &|_: &str| -> Option<String> { None })
    }

    fn build(layered: Layered, lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let async_strategy = match lookup("STRATUS_ASYNC") {
            Some(value) => value.parse()?,
            None => AsyncStrategy::default(),
        };
        let connect_timeout = seconds(lookup, "STRATUS_CONNECT_TIMEOUT_SECS", 10)?;
        let request_timeout = seconds(lookup, "STRATUS_REQUEST_TIMEOUT_SECS", 300)?;

        let base_url = layered
            .apiurl
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if base_url.trim().is_empty() {
            return Err(SdkError::Config("api url is empty".to_string()));
        }

        Ok(Self {
            base_url: normalize_base_url(&base_url),
            namespace: layered.namespace,
            key: layered.key,
            async_strategy,
            connect_timeout,
            request_timeout,
        })
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(&url.into());
        self
    }

    /// Set the namespace and key used to authenticate.
    pub fn with_credentials(mut self, namespace: impl Into<String>, key: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.key = Some(key.into());
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the secret key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the async strategy.
    pub fn with_async_strategy(mut self, strategy: AsyncStrategy) -> Self {
        self.async_strategy = strategy;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<Duration> {
    match lookup(name) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| SdkError::Config(format!("invalid {}: {}", name, e))),
    }
}

/// Read a credentials file. A missing file is `None`; with `skip_denied`, so
/// is one the current user may not read.
fn read_file_config(path: &Path, skip_denied: bool) -> Result<Option<FileConfig>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if skip_denied && e.kind() == std::io::ErrorKind::PermissionDenied => {
            debug!(path = %path.display(), "configuration file not readable, skipping");
            return Ok(None);
        }
        Err(e) => {
            return Err(SdkError::Config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )));
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| SdkError::Config(format!("invalid {}: {}", path.display(), e)))
}

/// Path of the per-user credentials file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(USER_CONFIG_FILE))
}
