// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::app::errors::{
    ActionError, ActionErrorKind, ActionResult, codes, internal,
};
use crate::app::machine::{self, Plan};
use crate::app::ports::{
    ApplicationRecordStorePort, ClockPort, EventSinkPort, SubmissionGatewayPort,
};
use crate::app::types::{
    ApplicationRecord, LifecycleEvent, LifecycleState, SubmissionSpec, TransitionCause,
};

/// Bounds for the gateway calls. All three are mandatory; the controller
/// never blocks indefinitely on the remote side.
#[derive(Debug, Clone, Copy)]
pub struct ControllerTimeouts {
    pub submit: Duration,
    pub cancel: Duration,
    /// Bound for the fire-and-forget cancel spawned by forced stop.
    pub forced_stop_cancel: Duration,
}

impl Default for ControllerTimeouts {
    fn default() -> Self {
        Self {
            submit: Duration::from_secs(60),
            cancel: Duration::from_secs(30),
            forced_stop_cancel: Duration::from_secs(30),
        }
    }
}

/// Drives applications through start/restart/cancel/forced-stop/revoke
/// against the submission gateway, serializing all mutation per application
/// and persisting every transition through the record store's
/// compare-and-swap.
#[derive(Clone)]
pub struct ActionController {
    store: Arc<dyn ApplicationRecordStorePort>,
    gateway: Arc<dyn SubmissionGatewayPort>,
    events: Arc<dyn EventSinkPort>,
    clock: Arc<dyn ClockPort>,
    locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    timeouts: ControllerTimeouts,
}

impl ActionController {
    pub fn new(
        store: Arc<dyn ApplicationRecordStorePort>,
        gateway: Arc<dyn SubmissionGatewayPort>,
        events: Arc<dyn EventSinkPort>,
        clock: Arc<dyn ClockPort>,
        timeouts: ControllerTimeouts,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            clock,
            locks: Arc::new(StdMutex::new(HashMap::new())),
            timeouts,
        }
    }

    /// Start the application, creating its record on first start. Already
    /// starting/running is a no-op success so callers and recovery sweeps
    /// may retry freely. With `auto` set, submission failures are logged
    /// and persisted but not surfaced.
    pub async fn start(&self, spec: &SubmissionSpec, auto: bool) -> ActionResult<()> {
        let _guard = self.lock_for(&spec.app_id).await;
        let record = match self.store.load(&spec.app_id).await? {
            Some(record) => record,
            None => {
                let record = ApplicationRecord::new(spec, auto, self.now());
                self.store.insert(&record).await?;
                tracing::info!(
                    app_id = %spec.app_id,
                    cluster_id = %spec.cluster_id,
                    "application record created"
                );
                record
            }
        };
        match machine::plan_start(&record)? {
            Plan::AlreadySatisfied => {
                tracing::debug!(app_id = %record.id, state = %record.state, "start is a no-op");
                return Ok(());
            }
            Plan::Proceed(_) => {}
        }

        let mut record = record;
        record.auto_start = auto;
        record.cluster_id = Some(spec.cluster_id.clone());
        record.artifact = Some(spec.artifact.clone());
        record.args = spec.args.clone();
        let cause = if auto {
            TransitionCause::AutoStart
        } else {
            TransitionCause::OperatorStart
        };
        let record = self
            .persist_transition(record, LifecycleState::Starting, None, cause)
            .await?;
        self.drive_submission(record, spec, auto).await
    }

    /// Cancel-then-start as one unit under the per-application lock, so no
    /// third party can interleave its own start in between. Requires a
    /// running application.
    pub async fn restart(&self, spec: &SubmissionSpec) -> ActionResult<()> {
        let _guard = self.lock_for(&spec.app_id).await;
        let record = self.load_required(&spec.app_id).await?;
        match machine::plan_restart(&record)? {
            Plan::AlreadySatisfied => return Ok(()),
            Plan::Proceed(_) => {}
        }
        let handle = record.remote_handle.clone().ok_or_else(|| {
            internal(format!(
                "running application '{}' has no remote handle",
                record.id
            ))
        })?;
        let record = self
            .persist_transition(
                record,
                LifecycleState::Restarting,
                Some(handle.clone()),
                TransitionCause::Restart,
            )
            .await?;
        self.cancel_remote(&record.id, &handle).await;
        let record = self
            .persist_transition(record, LifecycleState::Starting, None, TransitionCause::Restart)
            .await?;
        self.drive_submission(record, spec, false).await
    }

    /// Graceful cancel. Waits for the gateway acknowledgment up to the
    /// cancel bound, then reaches `Stopped` either way; a timeout is
    /// logged, not surfaced.
    pub async fn cancel(&self, spec: &SubmissionSpec) -> ActionResult<()> {
        let _guard = self.lock_for(&spec.app_id).await;
        let record = self.load_required(&spec.app_id).await?;
        match machine::plan_cancel(&record)? {
            Plan::AlreadySatisfied => {
                tracing::debug!(app_id = %record.id, "cancel is a no-op");
                return Ok(());
            }
            Plan::Proceed(_) => {}
        }
        let handle = record.remote_handle.clone();
        let record = self
            .persist_transition(
                record,
                LifecycleState::Cancelling,
                handle.clone(),
                TransitionCause::Cancel,
            )
            .await?;
        if let Some(handle) = &handle {
            self.cancel_remote(&record.id, handle).await;
        }
        self.persist_transition(record, LifecycleState::Stopped, None, TransitionCause::Cancel)
            .await?;
        Ok(())
    }

    /// Forced stop by id. Intentionally lenient: unknown or already-stopped
    /// applications are fine, and the local transition to `Stopped` never
    /// waits on the gateway. Remote cleanup is spawned best-effort; an
    /// orphaned remote job is an accepted trade for local liveness.
    pub async fn forced_stop(&self, id: &str) {
        let _guard = self.lock_for(id).await;
        let record = match self.store.load(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(app_id = id, "forced stop on unknown application; nothing to do");
                return;
            }
            Err(err) => {
                tracing::warn!(app_id = id, "forced stop could not load record: {err}");
                return;
            }
        };
        match machine::plan_forced_stop(&record) {
            Plan::AlreadySatisfied => return,
            Plan::Proceed(_) => {}
        }
        let handle = record.remote_handle.clone();
        let record = match self
            .persist_transition(
                record,
                LifecycleState::ForceStopping,
                handle.clone(),
                TransitionCause::ForcedStop,
            )
            .await
        {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(app_id = id, "forced stop could not persist: {err}");
                return;
            }
        };
        if let Err(err) = self
            .persist_transition(record, LifecycleState::Stopped, None, TransitionCause::ForcedStop)
            .await
        {
            tracing::warn!(app_id = id, "forced stop could not persist: {err}");
            return;
        }
        if let Some(handle) = handle {
            let gateway = Arc::clone(&self.gateway);
            let bound = self.timeouts.forced_stop_cancel;
            let app_id = id.to_string();
            tokio::spawn(async move {
                match tokio::time::timeout(bound, gateway.cancel(&handle)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(app_id = %app_id, "best-effort remote cancel failed: {err}");
                    }
                    Err(_) => {
                        tracing::debug!(
                            app_id = %app_id,
                            "best-effort remote cancel did not acknowledge within {bound:?}"
                        );
                    }
                }
            });
        }
    }

    /// Permanently bar the application from starting again. Only legal in a
    /// terminal state with no outstanding remote handle.
    pub async fn revoke(&self, id: &str) -> ActionResult<()> {
        let _guard = self.lock_for(id).await;
        let mut current = self.load_required(id).await?;
        match machine::plan_revoke(&current)? {
            Plan::AlreadySatisfied => return Ok(()),
            Plan::Proceed(_) => {}
        }
        for attempt in 0..2 {
            let now = self.now();
            let mut updated = current.clone();
            updated.revoked = true;
            updated.version = current.version + 1;
            updated.last_transition_at = now.clone();
            if self
                .store
                .compare_and_swap(id, current.version, &updated)
                .await?
            {
                self.events.publish(LifecycleEvent {
                    app_id: id.to_string(),
                    old_state: current.state,
                    new_state: updated.state,
                    cause: TransitionCause::Revoke,
                    at: now,
                });
                tracing::info!(app_id = id, "application revoked");
                return Ok(());
            }
            if attempt == 0 {
                tracing::warn!(app_id = id, "stale version revoking application; reloading once");
                current = self.load_required(id).await?;
                if current.revoked {
                    return Ok(());
                }
                machine::plan_revoke(&current)?;
            }
        }
        Err(ActionError::with_message(
            ActionErrorKind::ConcurrentModification,
            codes::CONCURRENT_MODIFICATION,
            format!("application '{id}' was modified concurrently during revoke"),
        ))
    }

    /// Pure read; no per-application locking beyond the store's own
    /// consistency. Most recent transition first.
    pub async fn get_by_cluster_id(
        &self,
        cluster_id: &str,
    ) -> ActionResult<Vec<ApplicationRecord>> {
        self.store.list_by_cluster(cluster_id).await
    }

    /// Recovery sweep: applications stuck in `Starting`/`Restarting` longer
    /// than `staleness` (daemon died mid-submission) are reset to `Failed`
    /// and re-driven with an auto start. Returns how many were re-driven.
    pub async fn recover_stale(&self, staleness: Duration) -> ActionResult<usize> {
        let staleness = time::Duration::try_from(staleness)
            .map_err(|err| internal(format!("staleness bound out of range: {err}")))?;
        let cutoff = self.clock.now_utc() - staleness;
        let mut recovered = 0;
        for state in [LifecycleState::Starting, LifecycleState::Restarting] {
            for candidate in self.store.list_by_state(state).await? {
                if !is_stale(&candidate, cutoff) {
                    continue;
                }
                let Some(spec) = candidate.submission_spec() else {
                    tracing::warn!(
                        app_id = %candidate.id,
                        "stale application has no stored submission spec; skipping"
                    );
                    continue;
                };
                // One broken candidate must not starve the rest of the sweep.
                match self.redrive_stale(&candidate.id, state, cutoff, &spec).await {
                    Ok(true) => recovered += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(
                            app_id = %candidate.id,
                            "recovery of stale application failed: {err}"
                        );
                    }
                }
            }
        }
        Ok(recovered)
    }

    async fn redrive_stale(
        &self,
        id: &str,
        expected_state: LifecycleState,
        cutoff: OffsetDateTime,
        spec: &SubmissionSpec,
    ) -> ActionResult<bool> {
        {
            let _guard = self.lock_for(id).await;
            let Some(current) = self.store.load(id).await? else {
                return Ok(false);
            };
            // Re-check under the lock; a concurrent operation may have
            // moved it on since the listing.
            if current.state != expected_state || !is_stale(&current, cutoff) {
                return Ok(false);
            }
            tracing::info!(
                app_id = %current.id,
                state = %current.state,
                since = %current.last_transition_at,
                "resetting stale application before auto restart"
            );
            self.persist_transition(
                current,
                LifecycleState::Failed,
                None,
                TransitionCause::RecoveryReset,
            )
            .await?;
        }
        self.start(spec, true).await?;
        Ok(true)
    }

    // --- internals ---

    async fn lock_for(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries held only by the registry are idle; drop them so the
            // registry tracks live operations, not every id ever seen.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn lock_registry_len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn load_required(&self, id: &str) -> ActionResult<ApplicationRecord> {
        self.store.load(id).await?.ok_or_else(|| {
            ActionError::with_message(
                ActionErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("application '{id}' does not exist"),
            )
        })
    }

    /// Submit under the held lock, bounded by the submit timeout, and land
    /// the record in `Running` or `Failed`. The failure is persisted before
    /// it is surfaced (or swallowed for auto starts).
    async fn drive_submission(
        &self,
        record: ApplicationRecord,
        spec: &SubmissionSpec,
        auto: bool,
    ) -> ActionResult<()> {
        match tokio::time::timeout(self.timeouts.submit, self.gateway.submit(spec)).await {
            Ok(Ok(handle)) => {
                self.persist_transition(
                    record,
                    LifecycleState::Running,
                    Some(handle),
                    TransitionCause::SubmissionAck,
                )
                .await?;
                tracing::info!(app_id = %spec.app_id, "application running");
                Ok(())
            }
            Ok(Err(err)) => {
                self.persist_transition(
                    record,
                    LifecycleState::Failed,
                    None,
                    TransitionCause::SubmissionFailed,
                )
                .await?;
                self.surface_or_log(
                    ActionError::with_message(
                        ActionErrorKind::Submission,
                        codes::SUBMISSION_FAILED,
                        format!("submission of application '{}' failed: {err}", spec.app_id),
                    ),
                    auto,
                )
            }
            Err(_) => {
                self.persist_transition(
                    record,
                    LifecycleState::Failed,
                    None,
                    TransitionCause::SubmissionFailed,
                )
                .await?;
                self.surface_or_log(
                    ActionError::with_message(
                        ActionErrorKind::Submission,
                        codes::SUBMISSION_FAILED,
                        format!(
                            "submission of application '{}' did not acknowledge within {:?}",
                            spec.app_id, self.timeouts.submit
                        ),
                    )
                    .with_context(codes::GATEWAY_TIMEOUT),
                    auto,
                )
            }
        }
    }

    fn surface_or_log(&self, err: ActionError, auto: bool) -> ActionResult<()> {
        if auto {
            tracing::warn!("auto start failed: {err}");
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Graceful remote cancel, bounded by the cancel timeout. A timeout or
    /// remote failure is logged and otherwise absorbed; the caller's local
    /// transition proceeds regardless.
    async fn cancel_remote(&self, app_id: &str, handle: &str) {
        match tokio::time::timeout(self.timeouts.cancel, self.gateway.cancel(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(app_id, handle, "remote cancel failed: {err}");
            }
            Err(_) => {
                let err = ActionError::with_message(
                    ActionErrorKind::GatewayTimeout,
                    codes::GATEWAY_TIMEOUT,
                    format!(
                        "remote cancel of '{handle}' did not acknowledge within {:?}",
                        self.timeouts.cancel
                    ),
                );
                tracing::warn!(app_id, "{err}");
            }
        }
    }

    /// Single CAS write moving `current` to `next_state`/`next_handle`,
    /// bumping the version and timestamp and publishing the lifecycle
    /// event. A stale version is retried once off a reload, then surfaced.
    async fn persist_transition(
        &self,
        mut current: ApplicationRecord,
        next_state: LifecycleState,
        next_handle: Option<String>,
        cause: TransitionCause,
    ) -> ActionResult<ApplicationRecord> {
        if next_state == LifecycleState::Running && next_handle.is_none() {
            return Err(internal(format!(
                "refusing to mark application '{}' running without a remote handle",
                current.id
            )));
        }
        if next_state.is_terminal() && next_handle.is_some() {
            return Err(internal(format!(
                "refusing to terminate application '{}' with a live remote handle",
                current.id
            )));
        }
        for attempt in 0..2 {
            let now = self.now();
            let mut updated = current.clone();
            updated.state = next_state;
            updated.remote_handle = next_handle.clone();
            updated.version = current.version + 1;
            updated.last_transition_at = now.clone();
            if self
                .store
                .compare_and_swap(&current.id, current.version, &updated)
                .await?
            {
                tracing::debug!(
                    app_id = %updated.id,
                    from = %current.state,
                    to = %next_state,
                    cause = cause.as_str(),
                    version = updated.version,
                    "transition persisted"
                );
                self.events.publish(LifecycleEvent {
                    app_id: updated.id.clone(),
                    old_state: current.state,
                    new_state: next_state,
                    cause,
                    at: now,
                });
                return Ok(updated);
            }
            if attempt == 0 {
                tracing::warn!(
                    app_id = %current.id,
                    "stale version writing application record; reloading once"
                );
                current = self.load_required(&current.id).await?;
                if current.state == next_state && current.remote_handle == next_handle {
                    return Ok(current);
                }
            }
        }
        Err(ActionError::with_message(
            ActionErrorKind::ConcurrentModification,
            codes::CONCURRENT_MODIFICATION,
            format!(
                "application '{}' was modified concurrently; gave up after one retry",
                current.id
            ),
        ))
    }

    fn now(&self) -> String {
        self.clock
            .now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
    }
}

fn is_stale(record: &ApplicationRecord, cutoff: OffsetDateTime) -> bool {
    match OffsetDateTime::parse(&record.last_transition_at, &Rfc3339) {
        Ok(at) => at <= cutoff,
        // An unparseable timestamp cannot prove freshness.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::EventSinkPort;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemoryStore {
        records: Mutex<HashMap<String, ApplicationRecord>>,
        // Number of CAS calls to reject up front, for conflict tests.
        reject_cas: AtomicUsize,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                reject_cas: AtomicUsize::new(0),
            }
        }

        fn seed(&self, record: ApplicationRecord) {
            self.records.lock().unwrap().insert(record.id.clone(), record);
        }

        fn get(&self, id: &str) -> Option<ApplicationRecord> {
            self.records.lock().unwrap().get(id).cloned()
        }
    }

    #[async_trait::async_trait]
    impl ApplicationRecordStorePort for MemoryStore {
        async fn insert(&self, record: &ApplicationRecord) -> ActionResult<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn load(&self, id: &str) -> ActionResult<Option<ApplicationRecord>> {
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        async fn compare_and_swap(
            &self,
            id: &str,
            expected_version: i64,
            record: &ApplicationRecord,
        ) -> ActionResult<bool> {
            if self
                .reject_cas
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(false);
            }
            let mut records = self.records.lock().unwrap();
            match records.get(id) {
                Some(stored) if stored.version == expected_version => {
                    records.insert(id.to_string(), record.clone());
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Ok(false),
            }
        }

        async fn list_by_cluster(
            &self,
            cluster_id: &str,
        ) -> ActionResult<Vec<ApplicationRecord>> {
            let mut out: Vec<ApplicationRecord> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.cluster_id.as_deref() == Some(cluster_id))
                .cloned()
                .collect();
            out.sort_by(|a, b| b.last_transition_at.cmp(&a.last_transition_at));
            Ok(out)
        }

        async fn list_by_state(
            &self,
            state: LifecycleState,
        ) -> ActionResult<Vec<ApplicationRecord>> {
            let mut out: Vec<ApplicationRecord> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.state == state)
                .cloned()
                .collect();
            out.sort_by(|a, b| {
                a.last_transition_at
                    .cmp(&b.last_transition_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(out)
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        handles: Mutex<VecDeque<String>>,
        submits: AtomicUsize,
        cancelled: Mutex<Vec<String>>,
        submit_delay: Option<Duration>,
        submit_hangs: bool,
        submit_fails: bool,
        cancel_hangs: bool,
    }

    impl FakeGateway {
        fn with_handles(handles: &[&str]) -> Self {
            Self {
                handles: Mutex::new(handles.iter().map(|h| h.to_string()).collect()),
                ..Self::default()
            }
        }

        fn submit_count(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }

        fn cancelled(&self) -> Vec<String> {
            self.cancelled.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SubmissionGatewayPort for FakeGateway {
        async fn submit(&self, spec: &SubmissionSpec) -> ActionResult<String> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst);
            if self.submit_hangs {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.submit_delay {
                tokio::time::sleep(delay).await;
            }
            if self.submit_fails {
                return Err(ActionError::with_message(
                    ActionErrorKind::Submission,
                    codes::SUBMISSION_FAILED,
                    format!("cluster rejected '{}'", spec.app_id),
                ));
            }
            let next = self.handles.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| format!("handle-{}", n + 1)))
        }

        async fn cancel(&self, handle: &str) -> ActionResult<()> {
            if self.cancel_hangs {
                std::future::pending::<()>().await;
            }
            self.cancelled.lock().unwrap().push(handle.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl RecordingSink {
        fn causes(&self) -> Vec<TransitionCause> {
            self.events.lock().unwrap().iter().map(|e| e.cause).collect()
        }
    }

    impl EventSinkPort for RecordingSink {
        fn publish(&self, event: LifecycleEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct FixedClock(OffsetDateTime);

    impl ClockPort for FixedClock {
        fn now_utc(&self) -> OffsetDateTime {
            self.0
        }
    }

    fn at(rfc3339: &str) -> OffsetDateTime {
        OffsetDateTime::parse(rfc3339, &Rfc3339).unwrap()
    }

    fn spec(app_id: &str) -> SubmissionSpec {
        SubmissionSpec {
            app_id: app_id.into(),
            cluster_id: "cluster-1".into(),
            artifact: "wordcount.jar".into(),
            args: vec!["--parallelism".into(), "4".into()],
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<FakeGateway>,
        sink: Arc<RecordingSink>,
        controller: ActionController,
    }

    fn harness(gateway: FakeGateway) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock(at("2026-02-01T12:00:00Z")));
        let timeouts = ControllerTimeouts {
            submit: Duration::from_secs(5),
            cancel: Duration::from_secs(3),
            forced_stop_cancel: Duration::from_secs(3),
        };
        let controller = ActionController::new(
            store.clone(),
            gateway.clone(),
            sink.clone(),
            clock,
            timeouts,
        );
        Harness {
            store,
            gateway,
            sink,
            controller,
        }
    }

    #[tokio::test]
    async fn start_creates_record_and_reaches_running() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        h.controller.start(&spec("app-1"), false).await.unwrap();

        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.remote_handle.as_deref(), Some("h1"));
        assert_eq!(record.cluster_id.as_deref(), Some("cluster-1"));
        assert!(!record.auto_start);
        assert_eq!(h.gateway.submit_count(), 1);
        assert_eq!(
            h.sink.causes(),
            vec![TransitionCause::OperatorStart, TransitionCause::SubmissionAck]
        );
    }

    #[tokio::test]
    async fn repeated_start_is_a_noop() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.start(&spec("app-1"), false).await.unwrap();

        assert_eq!(h.gateway.submit_count(), 1);
        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.remote_handle.as_deref(), Some("h1"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_submit_exactly_once() {
        let h = harness(FakeGateway {
            submit_delay: Some(Duration::from_millis(200)),
            ..FakeGateway::default()
        });
        let first = h.controller.clone();
        let second = h.controller.clone();
        let spec_a = spec("app-1");
        let spec_b = spec("app-1");
        let (a, b) = tokio::join!(first.start(&spec_a, false), second.start(&spec_b, false));
        a.unwrap();
        b.unwrap();

        assert_eq!(h.gateway.submit_count(), 1);
        assert_eq!(h.store.get("app-1").unwrap().state, LifecycleState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_timeout_fails_the_start() {
        let h = harness(FakeGateway {
            submit_hangs: true,
            ..FakeGateway::default()
        });
        let err = h.controller.start(&spec("app-1"), false).await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::Submission);
        assert_eq!(err.context(), Some(codes::GATEWAY_TIMEOUT));

        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Failed);
        assert_eq!(record.remote_handle, None);
    }

    #[tokio::test]
    async fn auto_start_swallows_submission_failure() {
        let h = harness(FakeGateway {
            submit_fails: true,
            ..FakeGateway::default()
        });
        h.controller.start(&spec("app-1"), true).await.unwrap();

        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Failed);
        assert!(record.auto_start);
        assert_eq!(
            h.sink.causes(),
            vec![TransitionCause::AutoStart, TransitionCause::SubmissionFailed]
        );
    }

    #[tokio::test]
    async fn restart_cancels_old_handle_and_submits_new_one() {
        let h = harness(FakeGateway::with_handles(&["h1", "h2"]));
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.restart(&spec("app-1")).await.unwrap();

        assert_eq!(h.gateway.cancelled(), vec!["h1".to_string()]);
        assert_eq!(h.gateway.submit_count(), 2);
        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.remote_handle.as_deref(), Some("h2"));
    }

    #[tokio::test]
    async fn restart_requires_running() {
        let h = harness(FakeGateway::default());
        let err = h.controller.restart(&spec("app-1")).await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::NotFound);

        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.cancel(&spec("app-1")).await.unwrap();
        let err = h.controller.restart(&spec("app-1")).await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn concurrent_cancel_and_restart_settle_on_stopped() {
        let h = harness(FakeGateway::with_handles(&["h1", "h2"]));
        h.controller.start(&spec("app-1"), false).await.unwrap();

        let canceller = h.controller.clone();
        let restarter = h.controller.clone();
        let cancel_spec = spec("app-1");
        let restart_spec = spec("app-1");
        let (cancel_res, restart_res) = tokio::join!(
            canceller.cancel(&cancel_spec),
            restarter.restart(&restart_spec),
        );

        // The per-application lock serializes the two: whichever loses sees
        // the winner's completed effect, never a half-done interleaving.
        cancel_res.unwrap();
        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.remote_handle, None);
        match restart_res {
            // Restart won the lock: it ran to completion first and cancel
            // then stopped the second submission.
            Ok(()) => {
                assert_eq!(h.gateway.submit_count(), 2);
                assert_eq!(h.gateway.cancelled(), vec!["h1".to_string(), "h2".to_string()]);
            }
            // Cancel won the lock: restart found a stopped application.
            Err(err) => {
                assert_eq!(err.kind(), ActionErrorKind::InvalidTransition);
                assert_eq!(h.gateway.submit_count(), 1);
                assert_eq!(h.gateway.cancelled(), vec!["h1".to_string()]);
            }
        }
    }

    #[tokio::test]
    async fn cancel_reaches_stopped_and_clears_handle() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.cancel(&spec("app-1")).await.unwrap();

        assert_eq!(h.gateway.cancelled(), vec!["h1".to_string()]);
        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.remote_handle, None);

        // Cancel again: no-op success.
        h.controller.cancel(&spec("app-1")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_timeout_is_non_fatal() {
        let h = harness(FakeGateway {
            handles: Mutex::new(VecDeque::from(["h1".to_string()])),
            cancel_hangs: true,
            ..FakeGateway::default()
        });
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.cancel(&spec("app-1")).await.unwrap();

        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.remote_handle, None);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_stop_is_local_even_with_dead_gateway() {
        let h = harness(FakeGateway {
            handles: Mutex::new(VecDeque::from(["h1".to_string()])),
            cancel_hangs: true,
            ..FakeGateway::default()
        });
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.forced_stop("app-1").await;

        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.remote_handle, None);
    }

    #[tokio::test]
    async fn forced_stop_is_lenient() {
        let h = harness(FakeGateway::default());
        // Unknown application: fine.
        h.controller.forced_stop("missing").await;
        // Already stopped: fine, no extra events.
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.cancel(&spec("app-1")).await.unwrap();
        let before = h.sink.causes().len();
        h.controller.forced_stop("app-1").await;
        assert_eq!(h.sink.causes().len(), before);
    }

    #[tokio::test]
    async fn revoke_is_a_permanent_start_barrier() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        h.controller.start(&spec("app-1"), false).await.unwrap();

        let err = h.controller.revoke("app-1").await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::IllegalState);

        h.controller.cancel(&spec("app-1")).await.unwrap();
        h.controller.revoke("app-1").await.unwrap();
        assert!(h.store.get("app-1").unwrap().revoked);

        let err = h.controller.start(&spec("app-1"), false).await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::InvalidTransition);
        let err = h.controller.restart(&spec("app-1")).await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::InvalidTransition);

        // Revoking twice is fine.
        h.controller.revoke("app-1").await.unwrap();
    }

    #[tokio::test]
    async fn event_sink_is_optional() {
        let store = Arc::new(MemoryStore::new());
        let controller = ActionController::new(
            store.clone(),
            Arc::new(FakeGateway::with_handles(&["h1"])),
            Arc::new(crate::app::ports::NoopEventSink),
            Arc::new(FixedClock(at("2026-02-01T12:00:00Z"))),
            ControllerTimeouts::default(),
        );
        controller.start(&spec("app-1"), false).await.unwrap();
        assert_eq!(store.get("app-1").unwrap().state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn one_cas_conflict_is_retried() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        h.store.reject_cas.store(1, Ordering::SeqCst);
        h.controller.start(&spec("app-1"), false).await.unwrap();
        assert_eq!(h.store.get("app-1").unwrap().state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn persistent_cas_conflict_is_surfaced() {
        let h = harness(FakeGateway::default());
        h.store.reject_cas.store(usize::MAX, Ordering::SeqCst);
        let err = h.controller.start(&spec("app-1"), false).await.unwrap_err();
        assert_eq!(err.kind(), ActionErrorKind::ConcurrentModification);
    }

    #[tokio::test]
    async fn get_by_cluster_id_orders_by_recency() {
        let h = harness(FakeGateway::default());
        let mut old = ApplicationRecord::new(&spec("app-old"), false, "2026-01-01T00:00:00Z".into());
        old.state = LifecycleState::Stopped;
        let mut new = ApplicationRecord::new(&spec("app-new"), false, "2026-01-03T00:00:00Z".into());
        new.state = LifecycleState::Stopped;
        h.store.seed(old);
        h.store.seed(new);

        let listed = h.controller.get_by_cluster_id("cluster-1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "app-new");
        assert_eq!(listed[1].id, "app-old");

        assert!(h.controller.get_by_cluster_id("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovery_sweep_redrives_stale_starting_applications() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        let mut stuck = ApplicationRecord::new(&spec("app-1"), true, "2026-02-01T00:00:00Z".into());
        stuck.state = LifecycleState::Starting;
        stuck.version = 3;
        h.store.seed(stuck);

        // Clock is 2026-02-01T12:00:00Z; anything older than an hour is stale.
        let recovered = h
            .controller
            .recover_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let record = h.store.get("app-1").unwrap();
        assert_eq!(record.state, LifecycleState::Running);
        assert_eq!(record.remote_handle.as_deref(), Some("h1"));
        assert!(h.sink.causes().contains(&TransitionCause::RecoveryReset));
    }

    #[tokio::test]
    async fn recovery_sweep_survives_a_failing_candidate() {
        let h = harness(FakeGateway::with_handles(&["h1"]));
        let mut first = ApplicationRecord::new(&spec("app-1"), true, "2026-02-01T00:00:00Z".into());
        first.state = LifecycleState::Starting;
        let mut second = ApplicationRecord::new(&spec("app-2"), true, "2026-02-01T01:00:00Z".into());
        second.state = LifecycleState::Starting;
        h.store.seed(first);
        h.store.seed(second);
        // The older candidate is swept first and exhausts both of its CAS
        // attempts; the sweep must still reach the second candidate.
        h.store.reject_cas.store(2, Ordering::SeqCst);

        let recovered = h
            .controller
            .recover_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(h.store.get("app-1").unwrap().state, LifecycleState::Starting);
        assert_eq!(h.store.get("app-2").unwrap().state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn idle_lock_entries_are_pruned() {
        let h = harness(FakeGateway::default());
        h.controller.start(&spec("app-1"), false).await.unwrap();
        h.controller.start(&spec("app-2"), false).await.unwrap();
        // app-1's idle entry went away when app-2 took its lock.
        assert_eq!(h.controller.lock_registry_len(), 1);
        h.controller.forced_stop("app-3").await;
        assert_eq!(h.controller.lock_registry_len(), 1);
    }

    #[tokio::test]
    async fn recovery_sweep_leaves_fresh_applications_alone() {
        let h = harness(FakeGateway::default());
        let mut fresh = ApplicationRecord::new(&spec("app-1"), true, "2026-02-01T11:59:00Z".into());
        fresh.state = LifecycleState::Starting;
        h.store.seed(fresh);

        let recovered = h
            .controller
            .recover_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(recovered, 0);
        assert_eq!(h.store.get("app-1").unwrap().state, LifecycleState::Starting);
    }
}
