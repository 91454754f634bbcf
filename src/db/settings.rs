//! Persisted sync state: the cursor, offline mode and per-kind fetch times.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use daybook_core::error::StoreError;
use daybook_core::models::EntityKind;
use daybook_core::sync::{CursorStore, SyncCursor};

use super::parse_timestamp;

const OFFLINE_MODE_KEY: &str = "offline_mode";

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pool: SqlitePool,
}

fn storage(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

impl SyncSettings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn offline_mode(&self) -> Result<bool, StoreError> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(OFFLINE_MODE_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(matches!(value, Some((v,)) if v == "true"))
    }

    pub async fn set_offline_mode(&self, enabled: bool) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(OFFLINE_MODE_KEY)
        .bind(enabled.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    /// Time of the last successful remote read for `kind`.
    pub async fn last_fetch_at(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT last_fetch_at FROM fetch_state WHERE entity_kind = ?")
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;

        value
            .map(|(v,)| {
                parse_timestamp(&v).map_err(|e| StoreError::Corrupt {
                    id: kind.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub async fn record_fetch(&self, kind: EntityKind, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO fetch_state (entity_kind, last_fetch_at) VALUES (?, ?) ON CONFLICT(entity_kind) DO UPDATE SET last_fetch_at = excluded.last_fetch_at",
        )
        .bind(kind.as_str())
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

impl CursorStore for SyncSettings {
    async fn load(&self) -> Result<SyncCursor, StoreError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT last_synced_at, remote_revision FROM sync_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;

        Ok(row
            .map(|(last_synced_at, remote_revision)| SyncCursor {
                last_synced_at,
                remote_revision,
            })
            .unwrap_or_default())
    }

    /// Never moves either position backwards.
    async fn save(&self, cursor: SyncCursor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, last_synced_at, remote_revision) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_synced_at = MAX(last_synced_at, excluded.last_synced_at),
                remote_revision = MAX(remote_revision, excluded.remote_revision)
            "#,
        )
        .bind(cursor.last_synced_at)
        .bind(cursor.remote_revision)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
