// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an application. `Stopped` and `Failed` are terminal;
/// the other states are transient and owned by in-flight operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Restarting,
    Cancelling,
    ForceStopping,
    Stopped,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Restarting => "restarting",
            LifecycleState::Cancelling => "cancelling",
            LifecycleState::ForceStopping => "force_stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLifecycleStateError(pub String);

impl std::fmt::Display for ParseLifecycleStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown lifecycle state '{}'", self.0)
    }
}

impl std::error::Error for ParseLifecycleStateError {}

impl FromStr for LifecycleState {
    type Err = ParseLifecycleStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(LifecycleState::Created),
            "starting" => Ok(LifecycleState::Starting),
            "running" => Ok(LifecycleState::Running),
            "restarting" => Ok(LifecycleState::Restarting),
            "cancelling" => Ok(LifecycleState::Cancelling),
            "force_stopping" => Ok(LifecycleState::ForceStopping),
            "stopped" => Ok(LifecycleState::Stopped),
            "failed" => Ok(LifecycleState::Failed),
            other => Err(ParseLifecycleStateError(other.to_string())),
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller hands to `start`/`restart`: enough to submit the
/// application to a cluster. Persisted alongside the record so recovery
/// sweeps can resubmit without the original caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSpec {
    /// Opaque, globally-unique application id.
    pub app_id: String,
    /// Cluster the application should be submitted to.
    pub cluster_id: String,
    /// Artifact (jar/image/bundle) reference understood by the gateway.
    pub artifact: String,
    pub args: Vec<String>,
}

/// Durable per-application record. `state` and `remote_handle` only ever
/// change together, through a single compare-and-swap write keyed on
/// `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub id: String,
    pub state: LifecycleState,
    pub cluster_id: Option<String>,
    /// Token the gateway returned for the live remote job, if any.
    /// Present exactly when the application is running remotely.
    pub remote_handle: Option<String>,
    pub artifact: Option<String>,
    pub args: Vec<String>,
    pub auto_start: bool,
    pub revoked: bool,
    pub version: i64,
    pub created_at: String,     // RFC3339
    pub last_transition_at: String, // RFC3339
}

impl ApplicationRecord {
    pub fn new(spec: &SubmissionSpec, auto: bool, now: String) -> Self {
        Self {
            id: spec.app_id.clone(),
            state: LifecycleState::Created,
            cluster_id: Some(spec.cluster_id.clone()),
            remote_handle: None,
            artifact: Some(spec.artifact.clone()),
            args: spec.args.clone(),
            auto_start: auto,
            revoked: false,
            version: 0,
            created_at: now.clone(),
            last_transition_at: now,
        }
    }

    /// Rebuild the submission spec from persisted fields, if the record
    /// has ever been started.
    pub fn submission_spec(&self) -> Option<SubmissionSpec> {
        Some(SubmissionSpec {
            app_id: self.id.clone(),
            cluster_id: self.cluster_id.clone()?,
            artifact: self.artifact.clone()?,
            args: self.args.clone(),
        })
    }
}

/// Why a transition happened; a closed set, one variant per action path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    OperatorStart,
    AutoStart,
    SubmissionAck,
    SubmissionFailed,
    Restart,
    Cancel,
    ForcedStop,
    Revoke,
    RecoveryReset,
}

impl TransitionCause {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionCause::OperatorStart => "operator_start",
            TransitionCause::AutoStart => "auto_start",
            TransitionCause::SubmissionAck => "submission_ack",
            TransitionCause::SubmissionFailed => "submission_failed",
            TransitionCause::Restart => "restart",
            TransitionCause::Cancel => "cancel",
            TransitionCause::ForcedStop => "forced_stop",
            TransitionCause::Revoke => "revoke",
            TransitionCause::RecoveryReset => "recovery_reset",
        }
    }
}

/// Domain event emitted on every persisted transition. Consumed by the
/// alerting collaborator; the controller never formats alerts itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub app_id: String,
    pub old_state: LifecycleState,
    pub new_state: LifecycleState,
    pub cause: TransitionCause,
    pub at: String, // RFC3339
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            LifecycleState::Created,
            LifecycleState::Starting,
            LifecycleState::Running,
            LifecycleState::Restarting,
            LifecycleState::Cancelling,
            LifecycleState::ForceStopping,
            LifecycleState::Stopped,
            LifecycleState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_is_rejected() {
        let err = "paused".parse::<LifecycleState>().unwrap_err();
        assert_eq!(err.0, "paused");
    }

    #[test]
    fn only_stopped_and_failed_are_terminal() {
        assert!(LifecycleState::Stopped.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::Running.is_terminal());
        assert!(!LifecycleState::Cancelling.is_terminal());
    }

    #[test]
    fn submission_spec_requires_cluster_and_artifact() {
        let spec = SubmissionSpec {
            app_id: "app-1".into(),
            cluster_id: "c1".into(),
            artifact: "job.jar".into(),
            args: vec!["--mode".into(), "batch".into()],
        };
        let record = ApplicationRecord::new(&spec, false, "2026-01-01T00:00:00Z".into());
        assert_eq!(record.submission_spec(), Some(spec));

        let mut bare = record.clone();
        bare.artifact = None;
        assert_eq!(bare.submission_spec(), None);
    }
}
