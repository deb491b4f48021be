// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chunked blob transfers.
//!
//! Both directions are client-driven streams with their own recovery rules:
//!
//! - [`upload`] sends a seekable source in adaptively sized chunks, rewinding
//!   the remote upload and the local cursor after a transient failure.
//! - [`download`] streams a blob into a writer and resumes from the last byte
//!   written when the connection drops mid-stream.
//!
//! The engines only see the [`UploadSink`] and [`BlobSource`] traits, so they
//! run unchanged against the control plane or an in-memory fake.

mod download;
mod upload;

pub use download::{
    BlobSource, DOWNLOAD_BUFFER_SIZE, DownloadSession, MAX_CONNECT_FAILURES, RANGE_WINDOW,
    download,
};
pub use upload::{
    MAX_CHUNK_SIZE, MAX_CONSECUTIVE_FAILURES, MIN_CHUNK_SIZE, TARGET_CHUNK_DURATION,
    UploadSession, UploadSink, next_chunk_size, sha512_hex, upload,
};

/// Receives the number of bytes transferred so far after every chunk.
///
/// The value can go down when an upload rewinds after a failure.
pub type Progress<'a> = &'a mut dyn FnMut(u64);

/// Progress callback that ignores every update.
pub fn no_progress(_: u64) {}

/// Hooks for the phases of a high-level artifact transfer.
pub trait TransferObserver {
    /// Bytes of the source hashed so far while looking for an identical blob.
    fn checksum_progress(&mut self, _hashed: u64) {}

    /// An existing blob will be reused; nothing is uploaded.
    fn blob_reused(&mut self, _blob_uuid: &str) {}

    /// A transfer of `total` bytes is starting.
    fn transfer_started(&mut self, _total: Option<u64>) {}

    /// Bytes transferred so far.
    fn transfer_progress(&mut self, _transferred: u64) {}
}

/// Observer that ignores everything.
impl TransferObserver for () {}
