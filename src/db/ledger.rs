//! `change_log` table backing [`ChangeLedger`].

use std::collections::HashSet;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use daybook_core::ledger::{next_logged_at, ChangeAction, ChangeEntry, ChangeLedger, LedgerError, LoggedAt};
use daybook_core::models::EntityKind;

use super::parse_uuid;

#[derive(Debug, Clone)]
pub struct SqliteChangeLedger {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    seq: i64,
    entity_kind: String,
    entity_id: String,
    action: String,
    logged_at: i64,
    pushed: bool,
}

impl TryFrom<ChangeRow> for ChangeEntry {
    type Error = LedgerError;

    fn try_from(row: ChangeRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| LedgerError::Corrupt {
            seq: row.seq,
            reason,
        };
        Ok(ChangeEntry {
            seq: row.seq,
            entity_kind: row.entity_kind.parse().map_err(corrupt)?,
            entity_id: parse_uuid(&row.entity_id).map_err(|e| corrupt(e.to_string()))?,
            action: row.action.parse().map_err(corrupt)?,
            logged_at: row.logged_at,
            pushed: row.pushed,
        })
    }
}

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

impl SqliteChangeLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an entry on the caller's connection, so it commits or rolls
    /// back together with the entity write it describes.
    pub async fn record_in(
        conn: &mut SqliteConnection,
        kind: EntityKind,
        id: Uuid,
        action: ChangeAction,
    ) -> Result<ChangeEntry, LedgerError> {
        // Compaction can delete the newest entries, so the sync cursor also
        // bounds the next timestamp from below.
        let (last,): (i64,) = sqlx::query_as(
            r#"
            SELECT MAX(
                COALESCE((SELECT MAX(logged_at) FROM change_log), 0),
                COALESCE((SELECT last_synced_at FROM sync_state WHERE id = 1), 0)
            )
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(storage)?;
        let logged_at = next_logged_at(last);

        let (seq,): (i64,) = sqlx::query_as(
            "INSERT INTO change_log (entity_kind, entity_id, action, logged_at, pushed) VALUES (?, ?, ?, ?, 0) RETURNING seq",
        )
        .bind(kind.as_str())
        .bind(id.to_string())
        .bind(action.as_str())
        .bind(logged_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(storage)?;

        tracing::debug!(seq, %kind, %id, %action, logged_at, "recorded change");

        Ok(ChangeEntry {
            seq,
            entity_kind: kind,
            entity_id: id,
            action,
            logged_at,
            pushed: false,
        })
    }

    /// Ids of one kind with entries still waiting to be pushed.
    pub async fn dirty_ids_in(
        conn: &mut SqliteConnection,
        kind: EntityKind,
    ) -> Result<HashSet<Uuid>, LedgerError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT entity_id FROM change_log WHERE pushed = 0 AND entity_kind = ?",
        )
        .bind(kind.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|(id,)| parse_uuid(id).map_err(storage))
            .collect()
    }
}

impl ChangeLedger for SqliteChangeLedger {
    async fn record(
        &self,
        kind: EntityKind,
        id: Uuid,
        action: ChangeAction,
    ) -> Result<ChangeEntry, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let entry = Self::record_in(&mut tx, kind, id, action).await?;
        tx.commit().await.map_err(storage)?;
        Ok(entry)
    }

    async fn unpushed_since(&self, cursor: LoggedAt) -> Result<Vec<ChangeEntry>, LedgerError> {
        let rows: Vec<ChangeRow> = sqlx::query_as(
            "SELECT * FROM change_log WHERE pushed = 0 AND logged_at > ? ORDER BY logged_at, seq",
        )
        .bind(cursor)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(ChangeEntry::try_from).collect()
    }

    async fn mark_pushed(&self, entries: &[ChangeEntry]) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(storage)?;
        for entry in entries {
            sqlx::query("UPDATE change_log SET pushed = 1 WHERE seq = ?")
                .bind(entry.seq)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)
    }

    async fn compact(&self, cursor: LoggedAt) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM change_log WHERE pushed = 1 AND logged_at <= ?")
            .bind(cursor)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<u64, LedgerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM change_log WHERE pushed = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(count.max(0) as u64)
    }
}
