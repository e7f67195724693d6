// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::ActionResult;
use crate::app::types::{ApplicationRecord, LifecycleState};

/// Durable store of one record per application. All mutation after insert
/// goes through `compare_and_swap`; blind writes are not part of the
/// contract.
#[async_trait]
pub trait ApplicationRecordStorePort: Send + Sync {
    async fn insert(&self, record: &ApplicationRecord) -> ActionResult<()>;
    async fn load(&self, id: &str) -> ActionResult<Option<ApplicationRecord>>;
    /// Write `record` only if the stored version still equals
    /// `expected_version`. Returns false on a stale write.
    async fn compare_and_swap(
        &self,
        id: &str,
        expected_version: i64,
        record: &ApplicationRecord,
    ) -> ActionResult<bool>;
    /// All applications currently or previously bound to the cluster,
    /// most recent transition first.
    async fn list_by_cluster(&self, cluster_id: &str) -> ActionResult<Vec<ApplicationRecord>>;
    async fn list_by_state(&self, state: LifecycleState) -> ActionResult<Vec<ApplicationRecord>>;
}
