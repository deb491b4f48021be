// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Waiting for server-side lifecycles to settle.
//!
//! Creating an instance, deleting a network or snapshotting a disk returns as
//! soon as the server has accepted the request. The resource then moves
//! through intermediate states on its own. This module polls a resource's
//! representation until its state leaves the in-progress set, bounded by the
//! deadline of the active [`AsyncStrategy`].
//!
//! Running out of time is not an error: the last snapshot comes back as
//! [`Awaited::StillPending`] so the caller can show "still creating" rather
//! than guess.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::strategy::{AsyncStrategy, Deadline};

/// Pause between two fetches of the same resource.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How in-progress states are described for a lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// In progress while the state is one of these.
    While(&'static [&'static str]),
    /// In progress until the state becomes one of these.
    Until(&'static [&'static str]),
}

/// The shape of one server-side lifecycle: where the state lives in a
/// snapshot and which values mean "not done yet" or "done, but failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub name: &'static str,
    pub id_field: &'static str,
    pub state_field: &'static str,
    pub progress: Progress,
    /// Settled states that count as failures, besides any `*-error` state.
    pub failed: &'static [&'static str],
}

pub const INSTANCE_CREATE: Lifecycle = Lifecycle {
    name: "instance create",
    id_field: "uuid",
    state_field: "state",
    progress: Progress::While(&["initial", "creating"]),
    failed: &["error"],
};

pub const INSTANCE_DELETE: Lifecycle = Lifecycle {
    name: "instance delete",
    id_field: "uuid",
    state_field: "state",
    progress: Progress::Until(&["deleted"]),
    failed: &[],
};

pub const NETWORK_CREATE: Lifecycle = Lifecycle {
    name: "network create",
    id_field: "uuid",
    state_field: "state",
    progress: Progress::While(&["initial", "creating"]),
    failed: &["error"],
};

pub const NETWORK_DELETE: Lifecycle = Lifecycle {
    name: "network delete",
    id_field: "uuid",
    state_field: "state",
    progress: Progress::Until(&["deleted"]),
    failed: &[],
};

pub const SNAPSHOT_BLOB: Lifecycle = Lifecycle {
    name: "snapshot blob",
    id_field: "blob_uuid",
    state_field: "state",
    progress: Progress::Until(&["created"]),
    failed: &["error"],
};

pub const AGENT_OPERATION: Lifecycle = Lifecycle {
    name: "agent operation",
    id_field: "uuid",
    state_field: "state",
    progress: Progress::While(&["preflight", "queued", "executing"]),
    failed: &["error"],
};

impl Lifecycle {
    /// State value of `snapshot`, if it has one.
    pub fn state<'a>(&self, snapshot: &'a Value) -> Option<&'a str> {
        snapshot.get(self.state_field).and_then(Value::as_str)
    }

    /// Identifier of `snapshot`, if it has one.
    pub fn id<'a>(&self, snapshot: &'a Value) -> Option<&'a str> {
        snapshot.get(self.id_field).and_then(Value::as_str)
    }

    fn is_failure_state(&self, state: &str) -> bool {
        self.failed.contains(&state) || state.ends_with("-error")
    }

    /// A snapshot without a state is settled: the resource is gone or the
    /// server no longer tracks it.
    pub fn is_settled(&self, snapshot: &Value) -> bool {
        let Some(state) = self.state(snapshot) else {
            return true;
        };
        if self.is_failure_state(state) {
            return true;
        }
        match self.progress {
            Progress::While(states) => !states.contains(&state),
            Progress::Until(states) => states.contains(&state),
        }
    }

    /// Outcome of a snapshot taken with no time left to wait.
    fn classify(&self, snapshot: Value) -> Awaited<Value> {
        if !self.is_settled(&snapshot) {
            return Awaited::StillPending(snapshot);
        }
        match self.state(&snapshot) {
            Some(state) if self.is_failure_state(state) => Awaited::Errored(snapshot),
            _ => Awaited::Ready(snapshot),
        }
    }
}

/// A resource the server is still working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub reference: String,
    pub lifecycle: &'static Lifecycle,
}

impl PendingOperation {
    pub fn new(reference: impl Into<String>, lifecycle: &'static Lifecycle) -> Self {
        Self {
            reference: reference.into(),
            lifecycle,
        }
    }
}

/// Result of waiting for a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "snapshot", rename_all = "lowercase")]
pub enum Awaited<T> {
    /// Settled in a success state.
    Ready(T),
    /// Settled in a failure state.
    Errored(T),
    /// The deadline passed first; this is the last snapshot observed.
    #[serde(rename = "pending")]
    StillPending(T),
}

impl<T> Awaited<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Awaited::Ready(_))
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Awaited::Errored(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Awaited::StillPending(_))
    }

    pub fn as_ref(&self) -> Awaited<&T> {
        match self {
            Awaited::Ready(v) => Awaited::Ready(v),
            Awaited::Errored(v) => Awaited::Errored(v),
            Awaited::StillPending(v) => Awaited::StillPending(v),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Awaited<U> {
        match self {
            Awaited::Ready(v) => Awaited::Ready(f(v)),
            Awaited::Errored(v) => Awaited::Errored(f(v)),
            Awaited::StillPending(v) => Awaited::StillPending(f(v)),
        }
    }

    /// Fallible `map`, for turning JSON snapshots into typed records.
    pub fn try_map<U, E, F>(self, f: F) -> std::result::Result<Awaited<U>, E>
    where
        F: FnOnce(T) -> std::result::Result<U, E>,
    {
        Ok(match self {
            Awaited::Ready(v) => Awaited::Ready(f(v)?),
            Awaited::Errored(v) => Awaited::Errored(f(v)?),
            Awaited::StillPending(v) => Awaited::StillPending(f(v)?),
        })
    }

    pub fn into_inner(self) -> T {
        match self {
            Awaited::Ready(v) | Awaited::Errored(v) | Awaited::StillPending(v) => v,
        }
    }

    /// Short label for logs and CLI output.
    pub fn outcome(&self) -> &'static str {
        match self {
            Awaited::Ready(_) => "ready",
            Awaited::Errored(_) => "errored",
            Awaited::StillPending(_) => "pending",
        }
    }
}

/// Wait for `op` to settle, starting from a snapshot the caller already has
/// (usually the body of the mutating response).
pub fn await_terminal<F>(
    clock: &dyn Clock,
    op: &PendingOperation,
    strategy: AsyncStrategy,
    initial: Value,
    fetch: F,
) -> Result<Awaited<Value>>
where
    F: FnMut(&str) -> Result<Value>,
{
    let deadline = strategy.deadline_from(clock.now());
    await_until(clock, op, deadline, initial, fetch)
}

/// Like [`await_terminal`], but the first snapshot comes from `fetch` too.
pub fn poll_until_settled<F>(
    clock: &dyn Clock,
    op: &PendingOperation,
    strategy: AsyncStrategy,
    mut fetch: F,
) -> Result<Awaited<Value>>
where
    F: FnMut(&str) -> Result<Value>,
{
    let deadline = strategy.deadline_from(clock.now());
    let initial = fetch(&op.reference)?;
    await_until(clock, op, deadline, initial, fetch)
}

/// The polling loop, against a deadline fixed by the caller.
pub fn await_until<F>(
    clock: &dyn Clock,
    op: &PendingOperation,
    deadline: Deadline,
    initial: Value,
    mut fetch: F,
) -> Result<Awaited<Value>>
where
    F: FnMut(&str) -> Result<Value>,
{
    let lifecycle = op.lifecycle;
    let mut current = initial;
    loop {
        if lifecycle.is_settled(&current) || deadline.has_passed(clock.now()) {
            let outcome = lifecycle.classify(current);
            debug!(
                lifecycle = lifecycle.name,
                reference = %op.reference,
                outcome = outcome.outcome(),
                "wait finished"
            );
            return Ok(outcome);
        }

        debug!(
            lifecycle = lifecycle.name,
            reference = %op.reference,
            state = lifecycle.state(&current).unwrap_or_default(),
            "waiting"
        );
        clock.sleep(POLL_INTERVAL);
        current = fetch(&op.reference)?;
    }
}

/// Wait for a set of resources sharing one lifecycle.
///
/// Nothing is known about the resources up front, so the loop sleeps before
/// the first fetch. `fetch` receives the references still pending and returns
/// whatever snapshots it could find; a reference it leaves out keeps its
/// previous snapshot. Results come back in the order of `references`; a
/// reference never observed before the deadline is `StillPending(Null)`.
pub fn await_all<F>(
    clock: &dyn Clock,
    lifecycle: &'static Lifecycle,
    strategy: AsyncStrategy,
    references: Vec<String>,
    mut fetch: F,
) -> Result<Vec<(String, Awaited<Value>)>>
where
    F: FnMut(&[String]) -> Result<Vec<(String, Value)>>,
{
    let deadline = strategy.deadline_from(clock.now());
    let mut observed: Vec<(String, Option<Value>)> =
        references.into_iter().map(|r| (r, None)).collect();

    loop {
        let pending: Vec<String> = observed
            .iter()
            .filter(|(_, snapshot)| match snapshot {
                Some(s) => !lifecycle.is_settled(s),
                None => true,
            })
            .map(|(r, _)| r.clone())
            .collect();

        if pending.is_empty() || deadline.has_passed(clock.now()) {
            debug!(
                lifecycle = lifecycle.name,
                pending = pending.len(),
                "wait for set finished"
            );
            return Ok(observed
                .into_iter()
                .map(|(reference, snapshot)| {
                    let outcome = match snapshot {
                        Some(s) => lifecycle.classify(s),
                        None => Awaited::StillPending(Value::Null),
                    };
                    (reference, outcome)
                })
                .collect());
        }

        debug!(
            lifecycle = lifecycle.name,
            pending = %pending.join(", "),
            "waiting for set"
        );
        clock.sleep(POLL_INTERVAL);
        for (reference, snapshot) in fetch(&pending)? {
            if let Some(slot) = observed.iter_mut().find(|(r, _)| *r == reference) {
                slot.1 = Some(snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn instance(state: &str) -> Value {
        json!({"uuid": "inst-1", "state": state})
    }

    fn scripted(states: &'static [&'static str]) -> impl FnMut(&str) -> Result<Value> {
        let mut remaining: Vec<Value> = states.iter().rev().map(|s| instance(s)).collect();
        move |_| Ok(remaining.pop().unwrap_or_else(|| instance("created")))
    }

    #[test]
    fn test_lifecycle_settled_states() {
        assert!(!INSTANCE_CREATE.is_settled(&instance("initial")));
        assert!(!INSTANCE_CREATE.is_settled(&instance("creating")));
        assert!(INSTANCE_CREATE.is_settled(&instance("created")));
        assert!(INSTANCE_CREATE.is_settled(&instance("creating-error")));
        assert!(!INSTANCE_DELETE.is_settled(&instance("deleting")));
        assert!(INSTANCE_DELETE.is_settled(&instance("deleted")));
        assert!(INSTANCE_DELETE.is_settled(&Value::Null));
        assert!(!AGENT_OPERATION.is_settled(&instance("queued")));
        assert!(AGENT_OPERATION.is_settled(&instance("complete")));
    }

    #[test]
    fn test_error_suffix_is_errored() {
        let clock = ManualClock::new();
        let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
        let result =
            await_terminal(&clock, &op, AsyncStrategy::Block, instance("creating-error"), |_| {
                unreachable!("settled snapshot must not be refetched")
            })
            .unwrap();
        assert!(result.is_errored());
    }

    #[test]
    fn test_settled_snapshot_fetched_once_for_every_strategy() {
        for strategy in [AsyncStrategy::Continue, AsyncStrategy::Pause, AsyncStrategy::Block] {
            let clock = ManualClock::new();
            let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
            let mut fetches = 0;
            let result = poll_until_settled(&clock, &op, strategy, |_| {
                fetches += 1;
                Ok(instance("created"))
            })
            .unwrap();
            assert_eq!(fetches, 1);
            assert_eq!(result, Awaited::Ready(instance("created")));
            assert!(clock.sleeps().is_empty());
        }
    }

    #[test]
    fn test_n_in_progress_then_settled_takes_n_plus_one_fetches() {
        let clock = ManualClock::new();
        let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
        let mut fetches = 0;
        let mut next = scripted(&["creating"; 5]);
        let result = poll_until_settled(&clock, &op, AsyncStrategy::Pause, |r| {
            fetches += 1;
            next(r)
        })
        .unwrap();
        assert_eq!(fetches, 6);
        assert_eq!(result, Awaited::Ready(instance("created")));
        assert_eq!(clock.sleeps().len(), 5);
    }

    #[test]
    fn test_instance_creation_with_block() {
        let clock = ManualClock::new();
        let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
        let mut fetches = 0;
        let mut next = scripted(&["initial", "creating", "creating", "created"]);
        let result = poll_until_settled(&clock, &op, AsyncStrategy::Block, |r| {
            fetches += 1;
            next(r)
        })
        .unwrap();
        assert_eq!(fetches, 4);
        assert_eq!(result, Awaited::Ready(instance("created")));
    }

    #[test]
    fn test_continue_returns_first_snapshot() {
        let clock = ManualClock::new();
        let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
        let mut fetches = 0;
        let mut next = scripted(&["initial", "creating", "creating", "created"]);
        let result = poll_until_settled(&clock, &op, AsyncStrategy::Continue, |r| {
            fetches += 1;
            next(r)
        })
        .unwrap();
        assert_eq!(fetches, 1);
        assert_eq!(result, Awaited::StillPending(instance("initial")));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_deadline_returns_last_snapshot() {
        let clock = ManualClock::new();
        let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
        let result = await_terminal(&clock, &op, AsyncStrategy::Pause, instance("initial"), |_| {
            Ok(instance("creating"))
        })
        .unwrap();
        assert_eq!(result, Awaited::StillPending(instance("creating")));
        assert!(clock.elapsed() <= Duration::from_secs(61));
        assert!(clock.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn test_fetch_error_propagates() {
        let clock = ManualClock::new();
        let op = PendingOperation::new("inst-1", &INSTANCE_CREATE);
        let result = await_terminal(&clock, &op, AsyncStrategy::Pause, instance("initial"), |_| {
            Err(crate::error::SdkError::Connection("reset".into()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_await_all_tracks_each_reference() {
        let clock = ManualClock::new();
        let mut round = 0;
        let result = await_all(
            &clock,
            &INSTANCE_DELETE,
            AsyncStrategy::Pause,
            vec!["a".into(), "b".into()],
            |pending| {
                round += 1;
                Ok(pending
                    .iter()
                    .map(|r| {
                        let state = if r == "a" || round > 2 { "deleted" } else { "deleting" };
                        (r.clone(), json!({"uuid": r, "state": state}))
                    })
                    .collect())
            },
        )
        .unwrap();

        assert_eq!(round, 3);
        assert!(result.iter().all(|(_, outcome)| outcome.is_ready()));
        assert_eq!(result[0].0, "a");
        assert_eq!(result[1].0, "b");
    }

    #[test]
    fn test_await_all_continue_reports_unobserved() {
        let clock = ManualClock::new();
        let result = await_all(
            &clock,
            &SNAPSHOT_BLOB,
            AsyncStrategy::Continue,
            vec!["blob-1".into()],
            |_| unreachable!("continue never fetches"),
        )
        .unwrap();
        assert_eq!(
            result,
            vec![("blob-1".to_string(), Awaited::StillPending(Value::Null))]
        );
    }

    #[test]
    fn test_awaited_helpers() {
        let awaited = Awaited::Ready(2);
        assert_eq!(awaited.as_ref().map(|v| v * 2), Awaited::Ready(4));
        assert_eq!(Awaited::StillPending(1).outcome(), "pending");
        let mapped: std::result::Result<Awaited<u8>, ()> =
            Awaited::Errored(3u32).try_map(|v| Ok(v as u8));
        assert_eq!(mapped, Ok(Awaited::Errored(3)));
    }

    #[test]
    fn test_awaited_serializes_with_outcome_tag() {
        let value = serde_json::to_value(Awaited::StillPending(instance("creating"))).unwrap();
        assert_eq!(value["outcome"], "pending");
        assert_eq!(value["snapshot"]["state"], "creating");
    }
}
