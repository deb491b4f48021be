// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adaptive, resumable upload.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use super::Progress;
use crate::clock::Clock;
use crate::error::{Result, SdkError};

/// Smallest chunk, and the size every upload (re)starts with.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
/// Largest chunk ever sent in one request.
pub const MAX_CHUNK_SIZE: usize = 2 * 1024 * 1024;
/// Wall-clock time each chunk should take.
pub const TARGET_CHUNK_DURATION: Duration = Duration::from_secs(3);
/// Consecutive failures tolerated before the upload is abandoned.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Remote end of an upload.
pub trait UploadSink {
    /// Append `chunk` and return the total number of bytes the remote side
    /// now holds.
    fn send(&mut self, chunk: &[u8]) -> Result<u64>;

    /// Discard everything after `offset`.
    fn truncate(&mut self, offset: u64) -> Result<()>;
}

impl<S: UploadSink + ?Sized> UploadSink for &mut S {
    fn send(&mut self, chunk: &[u8]) -> Result<u64> {
        (**self).send(chunk)
    }

    fn truncate(&mut self, offset: u64) -> Result<()> {
        (**self).truncate(offset)
    }
}

/// State of one upload in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Bytes confirmed by the remote side.
    pub sent: u64,
    pub chunk_size: usize,
    pub consecutive_failures: u32,
    /// Set after a failure until the remote side has been truncated.
    pub needs_rewind: bool,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self {
            sent: 0,
            chunk_size: MIN_CHUNK_SIZE,
            consecutive_failures: 0,
            needs_rewind: false,
        }
    }
}

impl UploadSession {
    /// Count a failure, or give up once the ceiling is exceeded.
    fn record_failure(&mut self, err: SdkError) -> Result<()> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > MAX_CONSECUTIVE_FAILURES {
            return Err(SdkError::RetriesExhausted {
                attempts: self.consecutive_failures,
                source: Box::new(err),
            });
        }
        warn!(
            offset = self.sent,
            attempt = self.consecutive_failures,
            error = %err,
            "upload chunk failed, rewinding"
        );
        self.needs_rewind = true;
        self.chunk_size = MIN_CHUNK_SIZE;
        Ok(())
    }
}

/// Chunk size that would have made the last chunk take
/// [`TARGET_CHUNK_DURATION`], clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
pub fn next_chunk_size(current: usize, elapsed: Duration) -> usize {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return MAX_CHUNK_SIZE;
    }
    let proposed = current as f64 * TARGET_CHUNK_DURATION.as_secs_f64() / secs;
    if !proposed.is_finite() {
        return MAX_CHUNK_SIZE;
    }
    // Float to int casts saturate.
    (proposed as usize).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Stream `source` into `sink` from the source's current position.
///
/// Returns the number of bytes sent. Every accepted chunk must leave the
/// remote total equal to the local one; a mismatch aborts with
/// [`SdkError::Integrity`]. Transient failures rewind both ends to the last
/// confirmed offset and continue with the smallest chunk size; more than
/// [`MAX_CONSECUTIVE_FAILURES`] in a row abort with
/// [`SdkError::RetriesExhausted`]. Other failures are returned as they are.
pub fn upload<R, S>(
    clock: &dyn Clock,
    source: &mut R,
    sink: &mut S,
    progress: Progress<'_>,
) -> Result<u64>
where
    R: Read + Seek + ?Sized,
    S: UploadSink + ?Sized,
{
    let base = source.stream_position()?;
    let mut session = UploadSession::default();
    let mut chunk = Vec::with_capacity(MIN_CHUNK_SIZE);

    loop {
        if session.needs_rewind {
            match sink.truncate(session.sent) {
                Ok(()) => {
                    source.seek(SeekFrom::Start(base + session.sent))?;
                    session.needs_rewind = false;
                    progress(session.sent);
                }
                Err(err) if err.is_transient() => {
                    session.record_failure(err)?;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        chunk.clear();
        Read::take(&mut *source, session.chunk_size as u64).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            break;
        }

        let started = clock.now();
        match sink.send(&chunk) {
            Ok(remote_total) => {
                let elapsed = clock.now().saturating_duration_since(started);
                session.sent += chunk.len() as u64;
                session.consecutive_failures = 0;
                if remote_total != session.sent {
                    return Err(SdkError::Integrity {
                        context: "upload".to_string(),
                        expected: session.sent,
                        actual: remote_total,
                    });
                }
                session.chunk_size = next_chunk_size(session.chunk_size, elapsed);
                debug!(
                    sent = session.sent,
                    next_chunk = session.chunk_size,
                    "upload chunk accepted"
                );
                progress(session.sent);
            }
            Err(err) if err.is_transient() => session.record_failure(err)?,
            Err(err) => return Err(err),
        }
    }

    Ok(session.sent)
}

/// Lowercase hex SHA-512 of everything `source` yields.
pub fn sha512_hex<R: Read + ?Sized>(source: &mut R, progress: Progress<'_>) -> Result<String> {
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
        progress(total);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
