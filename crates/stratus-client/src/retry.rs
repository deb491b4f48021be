// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry of requests whose dependencies are not ready yet.
//!
//! The control plane answers 406 when a request references another resource
//! that has not reached a usable state (a network still being created, an
//! instance still being deleted from a namespace). Those are worth retrying
//! until the strategy deadline; everything else is returned as-is.

use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::strategy::Deadline;

/// Pause between attempts while dependencies settle.
pub const DEPENDENCY_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Run `op` until it stops failing with `DependenciesNotReady` or `deadline`
/// passes. The deadline is shared by all attempts; once it has passed the
/// last `DependenciesNotReady` failure is returned unchanged.
pub fn with_dependency_retry<T, F>(clock: &dyn Clock, deadline: Deadline, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op() {
            Err(err) if err.is_dependency_not_ready() => {
                if deadline.has_passed(clock.now()) {
                    debug!(attempt, "deadline exceeded waiting for dependencies");
                    return Err(err);
                }
                debug!(attempt, "dependencies not ready, retrying");
                clock.sleep(DEPENDENCY_RETRY_INTERVAL);
            }
            other => return other,
        }
    }
}
