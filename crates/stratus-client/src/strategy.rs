// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Async strategies and the deadlines they imply.
//!
//! A state-changing call on the control plane usually returns before the
//! server has finished the work. The strategy decides how long the client
//! keeps waiting for the resource to settle:
//!
//! | strategy   | budget |
//! |------------|--------|
//! | `continue` | none, return what the first response said |
//! | `pause`    | 60 s   |
//! | `block`    | 3600 s |

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// How long an async-aware operation waits for server-side completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStrategy {
    Continue,
    #[default]
    Pause,
    Block,
}

impl AsyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncStrategy::Continue => "continue",
            AsyncStrategy::Pause => "pause",
            AsyncStrategy::Block => "block",
        }
    }

    /// Wait budget. Zero for `continue`.
    pub fn budget(&self) -> Duration {
        match self {
            AsyncStrategy::Continue => Duration::ZERO,
            AsyncStrategy::Pause => Duration::from_secs(60),
            AsyncStrategy::Block => Duration::from_secs(3600),
        }
    }

    /// Absolute deadline for an operation starting at `now`.
    pub fn deadline_from(&self, now: Instant) -> Deadline {
        match self {
            AsyncStrategy::Continue => Deadline::Immediate,
            other => Deadline::At(now + other.budget()),
        }
    }
}

impl FromStr for AsyncStrategy {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(AsyncStrategy::Continue),
            "pause" => Ok(AsyncStrategy::Pause),
            "block" => Ok(AsyncStrategy::Block),
            _ => Err(SdkError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for AsyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point in time after which a loop stops waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Never wait: the deadline is already behind us.
    Immediate,
    At(Instant),
}

impl Deadline {
    /// True once `now` is strictly past the deadline.
    pub fn has_passed(&self, now: Instant) -> bool {
        match self {
            Deadline::Immediate => true,
            Deadline::At(at) => now > *at,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match self {
            Deadline::Immediate => Duration::ZERO,
            Deadline::At(at) => at.saturating_duration_since(now),
        }
    }
}
