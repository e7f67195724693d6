// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::db::{ApplicationStore, RecordStoreError};
use crate::app::errors::{ActionError, ActionErrorKind, ActionResult, codes};
use crate::app::ports::ApplicationRecordStorePort;
use crate::app::types::{ApplicationRecord, LifecycleState};

#[derive(Clone)]
pub struct SqliteRecordStore {
    store: Arc<ApplicationStore>,
}

impl SqliteRecordStore {
    pub fn new(store: ApplicationStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Outbound adapter boundary: persistence-specific errors (RecordStoreError,
/// sqlx) are translated into app-level errors here so the controller never
/// sees DB details.
fn map_store_error(err: RecordStoreError) -> ActionError {
    match err {
        RecordStoreError::EmptyId => ActionError::with_message(
            ActionErrorKind::Internal,
            codes::INTERNAL_ERROR,
            "application id must not be empty",
        ),
        RecordStoreError::DuplicateId(id) => ActionError::with_message(
            ActionErrorKind::ConcurrentModification,
            codes::CONCURRENT_MODIFICATION,
            format!("application '{id}' was created concurrently"),
        ),
        RecordStoreError::InvalidState(raw) => ActionError::with_message(
            ActionErrorKind::Internal,
            codes::INTERNAL_ERROR,
            format!("stored state '{raw}' is not a lifecycle state"),
        ),
        RecordStoreError::Sqlx(_) | RecordStoreError::Serde(_) => {
            ActionError::new(ActionErrorKind::Internal, codes::INTERNAL_ERROR)
        }
    }
}

#[async_trait]
impl ApplicationRecordStorePort for SqliteRecordStore {
    async fn insert(&self, record: &ApplicationRecord) -> ActionResult<()> {
        self.store
            .insert_record(record)
            .await
            .map_err(map_store_error)
    }

    async fn load(&self, id: &str) -> ActionResult<Option<ApplicationRecord>> {
        self.store.get_record(id).await.map_err(map_store_error)
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected_version: i64,
        record: &ApplicationRecord,
    ) -> ActionResult<bool> {
        self.store
            .compare_and_swap(id, expected_version, record)
            .await
            .map_err(map_store_error)
    }

    async fn list_by_cluster(&self, cluster_id: &str) -> ActionResult<Vec<ApplicationRecord>> {
        self.store
            .list_by_cluster(cluster_id)
            .await
            .map_err(map_store_error)
    }

    async fn list_by_state(&self, state: LifecycleState) -> ActionResult<Vec<ApplicationRecord>> {
        self.store
            .list_by_state(state)
            .await
            .map_err(map_store_error)
    }
}
