// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Pure transition planning for the application lifecycle. The controller
//! asks this module what is legal; this module never touches the store or
//! the gateway.

use crate::app::errors::{ActionResult, illegal_state, invalid_transition};
use crate::app::types::{ApplicationRecord, LifecycleState};

/// Outcome of validating an operation against the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Legal; move to this state next.
    Proceed(LifecycleState),
    /// The operation's goal already holds; report success, do nothing.
    AlreadySatisfied,
}

/// start is legal from Created/Stopped/Failed, idempotent while a start is
/// in flight or complete, and permanently barred once revoked.
pub fn plan_start(record: &ApplicationRecord) -> ActionResult<Plan> {
    if record.revoked {
        return Err(invalid_transition(format!(
            "application '{}' is revoked and cannot be started",
            record.id
        )));
    }
    match record.state {
        LifecycleState::Starting | LifecycleState::Running => Ok(Plan::AlreadySatisfied),
        LifecycleState::Created | LifecycleState::Stopped | LifecycleState::Failed => {
            Ok(Plan::Proceed(LifecycleState::Starting))
        }
        state => Err(invalid_transition(format!(
            "cannot start application '{}' while {}",
            record.id, state
        ))),
    }
}

/// restart is cancel-then-start and only makes sense for a live job.
pub fn plan_restart(record: &ApplicationRecord) -> ActionResult<Plan> {
    if record.revoked {
        return Err(invalid_transition(format!(
            "application '{}' is revoked and cannot be restarted",
            record.id
        )));
    }
    match record.state {
        LifecycleState::Running => Ok(Plan::Proceed(LifecycleState::Restarting)),
        state => Err(invalid_transition(format!(
            "cannot restart application '{}' while {}; restart requires running",
            record.id, state
        ))),
    }
}

pub fn plan_cancel(record: &ApplicationRecord) -> ActionResult<Plan> {
    match record.state {
        LifecycleState::Stopped | LifecycleState::Failed => Ok(Plan::AlreadySatisfied),
        LifecycleState::Starting | LifecycleState::Running => {
            Ok(Plan::Proceed(LifecycleState::Cancelling))
        }
        state => Err(invalid_transition(format!(
            "cannot cancel application '{}' while {}",
            record.id, state
        ))),
    }
}

/// forced stop never fails on state: terminal states are a no-op, anything
/// else gets stopped locally.
pub fn plan_forced_stop(record: &ApplicationRecord) -> Plan {
    if record.state.is_terminal() {
        Plan::AlreadySatisfied
    } else {
        Plan::Proceed(LifecycleState::ForceStopping)
    }
}

/// revoke requires a terminal state with no live remote job behind it.
pub fn plan_revoke(record: &ApplicationRecord) -> ActionResult<Plan> {
    if record.revoked {
        return Ok(Plan::AlreadySatisfied);
    }
    if !record.state.is_terminal() {
        return Err(illegal_state(format!(
            "cannot revoke application '{}' while {}; revoke requires stopped or failed",
            record.id, record.state
        )));
    }
    if record.remote_handle.is_some() {
        return Err(illegal_state(format!(
            "cannot revoke application '{}': a remote job handle is still outstanding",
            record.id
        )));
    }
    // revoke flips a flag; lifecycle state stays put.
    Ok(Plan::Proceed(record.state))
}
