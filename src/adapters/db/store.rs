// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;

use crate::app::types::{ApplicationRecord, LifecycleState};

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("empty application id")]
    EmptyId,
    #[error("application already exists: {0}")]
    DuplicateId(String),
    #[error("stored state is not a lifecycle state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, RecordStoreError>;

/// Async SQLite-backed store of application records, one row per
/// application keyed by the caller-supplied id.
#[derive(Clone)]
pub struct ApplicationStore {
    pool: SqlitePool,
}

impl ApplicationStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let url = format!("sqlite://{}", path_ref.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    #[allow(dead_code)]
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_applications_table().await?;
        Ok(())
    }

    async fn ensure_applications_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
              id TEXT PRIMARY KEY,
              state TEXT NOT NULL,
              cluster_id TEXT,
              remote_handle TEXT,
              artifact TEXT,
              args TEXT NOT NULL DEFAULT '[]', -- JSON (stringified)
              auto_start INTEGER NOT NULL DEFAULT 0,
              revoked INTEGER NOT NULL DEFAULT 0,
              version INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
              last_transition_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_applications_cluster_id ON applications(cluster_id);
            CREATE INDEX IF NOT EXISTS idx_applications_state ON applications(state);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_record(&self, record: &ApplicationRecord) -> Result<()> {
        if record.id.trim().is_empty() {
            return Err(RecordStoreError::EmptyId);
        }
        let args = serialize_string_list(&record.args)?;
        let result = sqlx::query(
            r#"
            insert into applications(
                id, state, cluster_id, remote_handle, artifact, args,
                auto_start, revoked, version, created_at, last_transition_at
            )
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(record.id.clone())
        .bind(record.state.as_str())
        .bind(record.cluster_id.clone())
        .bind(record.remote_handle.clone())
        .bind(record.artifact.clone())
        .bind(args)
        .bind(record.auto_start as i64)
        .bind(record.revoked as i64)
        .bind(record.version)
        .bind(record.created_at.clone())
        .bind(record.last_transition_at.clone())
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RecordStoreError::DuplicateId(record.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<ApplicationRecord>> {
        let row = sqlx::query(
            r#"
            select * from applications
            where id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_record).transpose()
    }

    /// Write `record` over the stored row only if the stored version still
    /// equals `expected_version`. Returns false when another writer got
    /// there first.
    pub async fn compare_and_swap(
        &self,
        id: &str,
        expected_version: i64,
        record: &ApplicationRecord,
    ) -> Result<bool> {
        let args = serialize_string_list(&record.args)?;
        let result = sqlx::query(
            r#"
            update applications
            set state = ?1,
                cluster_id = ?2,
                remote_handle = ?3,
                artifact = ?4,
                args = ?5,
                auto_start = ?6,
                revoked = ?7,
                version = ?8,
                last_transition_at = ?9
            where id = ?10 and version = ?11
            "#,
        )
        .bind(record.state.as_str())
        .bind(record.cluster_id.clone())
        .bind(record.remote_handle.clone())
        .bind(record.artifact.clone())
        .bind(args)
        .bind(record.auto_start as i64)
        .bind(record.revoked as i64)
        .bind(record.version)
        .bind(record.last_transition_at.clone())
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_by_cluster(&self, cluster_id: &str) -> Result<Vec<ApplicationRecord>> {
        let rows = sqlx::query(
            r#"
            select * from applications
            where cluster_id = ?1
            order by last_transition_at desc, id asc
            "#,
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn list_by_state(&self, state: LifecycleState) -> Result<Vec<ApplicationRecord>> {
        let rows = sqlx::query(
            r#"
            select * from applications
            where state = ?1
            order by last_transition_at asc
            "#,
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }
}

// -- helpers

fn serialize_string_list(values: &[String]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

fn deserialize_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<ApplicationRecord> {
    let raw_state: String = row.try_get("state")?;
    let state = raw_state
        .parse::<LifecycleState>()
        .map_err(|err| RecordStoreError::InvalidState(err.0))?;
    let auto_start = row.try_get::<i64, _>("auto_start").unwrap_or(0) != 0;
    let revoked = row.try_get::<i64, _>("revoked").unwrap_or(0) != 0;
    Ok(ApplicationRecord {
        id: row.try_get("id")?,
        state,
        cluster_id: row.try_get("cluster_id").ok().flatten(),
        remote_handle: row.try_get("remote_handle").ok().flatten(),
        artifact: row.try_get("artifact").ok().flatten(),
        args: deserialize_string_list(row.try_get("args").ok()),
        auto_start,
        revoked,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        last_transition_at: row.try_get("last_transition_at")?,
    })
}
