// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Optional server features.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Blobs can be looked up by SHA-512, so identical uploads can be skipped.
pub const BLOB_SEARCH_BY_HASH: &str = "blob-search-by-hash";
/// Blob data requests are capped to a bounded byte range.
pub const BLOB_RANGE_LIMIT: &str = "blob-range-limit";
pub const ARTIFACT_METADATA: &str = "artifact-metadata";
pub const INTERFACE_METADATA: &str = "interface-metadata";
pub const NODE_METADATA: &str = "node-metadata";

/// Feature names advertised by `GET /capabilities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<String>);

impl Capabilities {
    /// Parse the JSON list returned by the server.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
