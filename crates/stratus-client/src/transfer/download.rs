// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resumable download.

use std::io::{ErrorKind, Read, Write};

use tracing::{debug, warn};

use super::Progress;
use crate::error::{Result, SdkError};

/// Largest byte range requested at once from servers that cap ranges.
pub const RANGE_WINDOW: u64 = 512 * 1024 * 1024;
/// Failed connection attempts tolerated before the download is abandoned.
pub const MAX_CONNECT_FAILURES: u32 = 2;
/// Read buffer used while streaming.
pub const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// Remote end of a download.
pub trait BlobSource {
    /// Open a stream starting at `offset`, covering at most `window` bytes
    /// when given. Failing to connect is reported as
    /// [`SdkError::Connection`].
    fn open(&mut self, offset: u64, window: Option<u64>) -> Result<Box<dyn Read + Send>>;
}

impl<S: BlobSource + ?Sized> BlobSource for &mut S {
    fn open(&mut self, offset: u64, window: Option<u64>) -> Result<Box<dyn Read + Send>> {
        (**self).open(offset, window)
    }
}

/// State of one download in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    pub expected: u64,
    /// Bytes written to the sink, which is also the next offset to request.
    pub received: u64,
    pub connect_failures: u32,
    /// Per-request range cap, when the server has one.
    pub window: Option<u64>,
}

impl DownloadSession {
    pub fn new(expected: u64, window: Option<u64>) -> Self {
        Self {
            expected,
            received: 0,
            connect_failures: 0,
            window,
        }
    }
}

enum Attempt {
    /// The stream ended cleanly after `n` bytes.
    Finished(u64),
    /// The stream broke after `n` bytes.
    Broken(u64, std::io::Error),
}

/// Stream `source` into `sink` and return the number of bytes written.
///
/// A stream that breaks after delivering data is reopened at the new offset;
/// one that breaks before delivering anything fails with
/// [`SdkError::StalledTransfer`]. Connection failures when opening are
/// tolerated [`MAX_CONNECT_FAILURES`] times. With a `window`, data is
/// requested in ranges of that size until one comes back short. The total
/// must equal `expected`, otherwise [`SdkError::Integrity`] is returned.
pub fn download<S, W>(
    source: &mut S,
    sink: &mut W,
    expected: u64,
    window: Option<u64>,
    progress: Progress<'_>,
) -> Result<u64>
where
    S: BlobSource + ?Sized,
    W: Write + ?Sized,
{
    let mut session = DownloadSession::new(expected, window);
    let mut buf = vec![0u8; DOWNLOAD_BUFFER_SIZE];

    loop {
        let mut stream = match source.open(session.received, session.window) {
            Ok(stream) => stream,
            Err(err @ SdkError::Connection(_)) => {
                session.connect_failures += 1;
                if session.connect_failures > MAX_CONNECT_FAILURES {
                    return Err(SdkError::RetriesExhausted {
                        attempts: session.connect_failures,
                        source: Box::new(err),
                    });
                }
                warn!(
                    offset = session.received,
                    attempt = session.connect_failures,
                    error = %err,
                    "download connection failed, retrying"
                );
                continue;
            }
            Err(err) => return Err(err),
        };

        let attempt = stream_into(&mut *stream, sink, &mut buf, &mut session, progress)?;
        match attempt {
            Attempt::Finished(n) => {
                let Some(window) = session.window else { break };
                if n < window || session.received >= session.expected {
                    break;
                }
                debug!(offset = session.received, "window complete, requesting next");
            }
            Attempt::Broken(0, err) => {
                return Err(SdkError::StalledTransfer {
                    offset: session.received,
                    reason: err.to_string(),
                });
            }
            Attempt::Broken(n, err) => {
                warn!(
                    offset = session.received,
                    bytes_in_attempt = n,
                    error = %err,
                    "download interrupted, resuming"
                );
            }
        }
    }

    sink.flush()?;
    if session.received != session.expected {
        return Err(SdkError::Integrity {
            context: "download".to_string(),
            expected: session.expected,
            actual: session.received,
        });
    }
    Ok(session.received)
}

/// Copy one stream attempt into the sink. Read failures end the attempt;
/// write failures are local and abort the download.
fn stream_into<W: Write + ?Sized>(
    stream: &mut (dyn Read + Send),
    sink: &mut W,
    buf: &mut [u8],
    session: &mut DownloadSession,
    progress: Progress<'_>,
) -> Result<Attempt> {
    let mut in_attempt = 0u64;
    loop {
        match stream.read(buf) {
            Ok(0) => return Ok(Attempt::Finished(in_attempt)),
            Ok(n) => {
                sink.write_all(&buf[..n])?;
                in_attempt += n as u64;
                session.received += n as u64;
                progress(session.received);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Ok(Attempt::Broken(in_attempt, e)),
        }
    }
}
