//! Server-side entity storage.
//!
//! One row per `(owner, kind, id)` in SQLite. Every write stamps the row
//! with the owner's next revision number, so clients can ask for "everything
//! since revision N". Deletes leave a tombstone row behind.
//!
//! Conflicts resolve last-writer-wins on `updated_at`, except that a
//! tombstone always beats an update.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use daybook_core::models::{Entity, EntityKind};

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// Database error.
    Database(sqlx::Error),
    /// A stored row could not be decoded.
    Corrupt { kind: String, id: String, reason: String },
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::Database(e) => write!(f, "Database error: {}", e),
            ServerStorageError::Corrupt { kind, id, reason } => {
                write!(f, "Corrupt {} {}: {}", kind, id, reason)
            }
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::Database(e) => Some(e),
            ServerStorageError::Corrupt { .. } => None,
        }
    }
}

impl From<sqlx::Error> for ServerStorageError {
    fn from(e: sqlx::Error) -> Self {
        ServerStorageError::Database(e)
    }
}

impl From<sqlx::migrate::MigrateError> for ServerStorageError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        ServerStorageError::Database(e.into())
    }
}

/// Result of writing one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The incoming copy was stored.
    Stored(Entity),
    /// The server already had a newer copy, returned here.
    Stale(Entity),
    /// The entity was deleted earlier; deletes are final.
    Deleted,
}

/// One stored row, live or tombstoned.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub kind: EntityKind,
    pub id: Uuid,
    /// `None` for tombstones.
    pub entity: Option<Entity>,
    pub revision: i64,
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    kind: String,
    id: String,
    payload: Option<String>,
    deleted: bool,
    updated_at: String,
    revision: i64,
}

impl EntityRow {
    fn corrupt(&self, reason: impl std::fmt::Display) -> ServerStorageError {
        ServerStorageError::Corrupt {
            kind: self.kind.clone(),
            id: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    fn updated_at(&self) -> Result<DateTime<Utc>, ServerStorageError> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| self.corrupt(e))
    }

    fn into_stored(self) -> Result<StoredEntity, ServerStorageError> {
        let kind = EntityKind::from_str(&self.kind).map_err(|e| self.corrupt(e))?;
        let id = Uuid::parse_str(&self.id).map_err(|e| self.corrupt(e))?;
        let entity = match (&self.payload, self.deleted) {
            (Some(payload), false) => {
                Some(serde_json::from_str::<Entity>(payload).map_err(|e| self.corrupt(e))?)
            }
            _ => None,
        };
        Ok(StoredEntity {
            kind,
            id,
            entity,
            revision: self.revision,
        })
    }
}

/// Server-side storage for synchronized entities.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    pool: SqlitePool,
}

impl ServerStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the server database and runs migrations.
    pub async fn open(path: &Path) -> Result<Self, ServerStorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::from)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./server_migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn revision(&self, owner: &str) -> Result<i64, ServerStorageError> {
        let mut conn = self.pool.acquire().await?;
        Self::revision_in(&mut conn, owner).await
    }

    /// Live entities of one kind, oldest revision first.
    pub async fn list(&self, owner: &str, kind: EntityKind) -> Result<Vec<Entity>, ServerStorageError> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            "SELECT kind, id, payload, deleted, updated_at, revision FROM entities WHERE owner = ? AND kind = ? AND deleted = 0 ORDER BY revision",
        )
        .bind(owner)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(entity) = row.into_stored()?.entity {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// The live entity, or `None` when missing or deleted.
    pub async fn get(
        &self,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
    ) -> Result<Option<Entity>, ServerStorageError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::load_in(&mut conn, owner, kind, id)
            .await?
            .and_then(|stored| stored.entity))
    }

    pub async fn put(&self, owner: &str, entity: &Entity) -> Result<WriteOutcome, ServerStorageError> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::upsert_in(&mut tx, owner, entity).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Returns false when there was no live entity to delete.
    pub async fn delete(&self, owner: &str, kind: EntityKind, id: Uuid) -> Result<bool, ServerStorageError> {
        let mut tx = self.pool.begin().await?;
        let existed = Self::tombstone_in(&mut tx, owner, kind, id).await?;
        tx.commit().await?;
        Ok(existed)
    }

    pub(crate) async fn revision_in(conn: &mut SqliteConnection, owner: &str) -> Result<i64, ServerStorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT revision FROM revisions WHERE owner = ?")
            .bind(owner)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(|(r,)| r).unwrap_or(0))
    }

    async fn next_revision(conn: &mut SqliteConnection, owner: &str) -> Result<i64, ServerStorageError> {
        let (revision,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO revisions (owner, revision) VALUES (?, 1)
            ON CONFLICT(owner) DO UPDATE SET revision = revision + 1
            RETURNING revision
            "#,
        )
        .bind(owner)
        .fetch_one(&mut *conn)
        .await?;
        Ok(revision)
    }

    pub(crate) async fn load_in(
        conn: &mut SqliteConnection,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
    ) -> Result<Option<StoredEntity>, ServerStorageError> {
        let row: Option<EntityRow> = sqlx::query_as(
            "SELECT kind, id, payload, deleted, updated_at, revision FROM entities WHERE owner = ? AND kind = ? AND id = ?",
        )
        .bind(owner)
        .bind(kind.as_str())
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(EntityRow::into_stored).transpose()
    }

    pub(crate) async fn upsert_in(
        conn: &mut SqliteConnection,
        owner: &str,
        entity: &Entity,
    ) -> Result<WriteOutcome, ServerStorageError> {
        let kind = entity.kind();
        let id = entity.id().to_string();

        let existing: Option<EntityRow> = sqlx::query_as(
            "SELECT kind, id, payload, deleted, updated_at, revision FROM entities WHERE owner = ? AND kind = ? AND id = ?",
        )
        .bind(owner)
        .bind(kind.as_str())
        .bind(&id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = existing {
            if row.deleted {
                return Ok(WriteOutcome::Deleted);
            }
            if row.updated_at()? > entity.updated_at() {
                if let Some(current) = row.into_stored()?.entity {
                    return Ok(WriteOutcome::Stale(current));
                }
            }
        }

        let payload = serde_json::to_string(entity).map_err(|e| ServerStorageError::Corrupt {
            kind: kind.to_string(),
            id: id.clone(),
            reason: e.to_string(),
        })?;
        let revision = Self::next_revision(conn, owner).await?;

        sqlx::query(
            r#"
            INSERT INTO entities (owner, kind, id, payload, deleted, updated_at, revision)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(owner, kind, id) DO UPDATE SET
                payload = excluded.payload,
                deleted = 0,
                updated_at = excluded.updated_at,
                revision = excluded.revision
            "#,
        )
        .bind(owner)
        .bind(kind.as_str())
        .bind(&id)
        .bind(&payload)
        .bind(entity.updated_at().to_rfc3339())
        .bind(revision)
        .execute(&mut *conn)
        .await?;

        Ok(WriteOutcome::Stored(entity.clone()))
    }

    /// Replaces the entity with a tombstone. Returns true when a live
    /// entity was removed.
    pub(crate) async fn tombstone_in(
        conn: &mut SqliteConnection,
        owner: &str,
        kind: EntityKind,
        id: Uuid,
    ) -> Result<bool, ServerStorageError> {
        let existing = Self::load_in(conn, owner, kind, id).await?;
        if matches!(&existing, Some(stored) if stored.entity.is_none()) {
            return Ok(false);
        }

        let revision = Self::next_revision(conn, owner).await?;
        sqlx::query(
            r#"
            INSERT INTO entities (owner, kind, id, payload, deleted, updated_at, revision)
            VALUES (?, ?, ?, NULL, 1, ?, ?)
            ON CONFLICT(owner, kind, id) DO UPDATE SET
                payload = NULL,
                deleted = 1,
                updated_at = excluded.updated_at,
                revision = excluded.revision
            "#,
        )
        .bind(owner)
        .bind(kind.as_str())
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(revision)
        .execute(&mut *conn)
        .await?;

        Ok(existing.is_some())
    }

    /// Every row (tombstones included) written after `revision`.
    pub(crate) async fn changes_since_in(
        conn: &mut SqliteConnection,
        owner: &str,
        revision: i64,
    ) -> Result<Vec<StoredEntity>, ServerStorageError> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            "SELECT kind, id, payload, deleted, updated_at, revision FROM entities WHERE owner = ? AND revision > ? ORDER BY revision",
        )
        .bind(owner)
        .bind(revision)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(EntityRow::into_stored).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use daybook_core::models::Task;
    use tempfile::TempDir;

    struct TestContext {
        storage: ServerStorage,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::open(&temp_dir.path().join("server.db")).await.unwrap();
        TestContext {
            storage,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_put_get_list() {
        let ctx = setup().await;
        let task = Task::new("Server task");
        let entity = Entity::from(task.clone());

        let outcome = ctx.storage.put("alice", &entity).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Stored(entity.clone()));

        assert_eq!(
            ctx.storage.get("alice", EntityKind::Task, task.id).await.unwrap(),
            Some(entity.clone())
        );
        assert_eq!(ctx.storage.list("alice", EntityKind::Task).await.unwrap(), vec![entity]);
        assert_eq!(ctx.storage.revision("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let ctx = setup().await;
        let task = Task::new("Private");
        ctx.storage.put("alice", &task.clone().into()).await.unwrap();

        assert!(ctx.storage.get("bob", EntityKind::Task, task.id).await.unwrap().is_none());
        assert!(ctx.storage.list("bob", EntityKind::Task).await.unwrap().is_empty());
        assert_eq!(ctx.storage.revision("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_older_write_loses() {
        let ctx = setup().await;
        let mut newer = Task::new("Newer title");
        let mut older = newer.clone();
        older.title = "Older title".to_string();
        older.updated_at = newer.updated_at - Duration::minutes(5);
        newer.updated_at += Duration::seconds(1);

        ctx.storage.put("alice", &newer.clone().into()).await.unwrap();
        let outcome = ctx.storage.put("alice", &older.into()).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Stale(newer.clone().into()));
        assert_eq!(
            ctx.storage.get("alice", EntityKind::Task, newer.id).await.unwrap(),
            Some(newer.into())
        );
    }

    #[tokio::test]
    async fn test_tombstone_beats_later_update() {
        let ctx = setup().await;
        let mut task = Task::new("Deleted soon");
        ctx.storage.put("alice", &task.clone().into()).await.unwrap();

        assert!(ctx.storage.delete("alice", EntityKind::Task, task.id).await.unwrap());
        assert!(!ctx.storage.delete("alice", EntityKind::Task, task.id).await.unwrap());

        task.updated_at += Duration::hours(1);
        let outcome = ctx.storage.put("alice", &task.clone().into()).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Deleted);
        assert!(ctx.storage.get("alice", EntityKind::Task, task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changes_since_includes_tombstones() {
        let ctx = setup().await;
        let kept = Task::new("Kept");
        let removed = Task::new("Removed");
        ctx.storage.put("alice", &kept.clone().into()).await.unwrap();
        ctx.storage.put("alice", &removed.clone().into()).await.unwrap();
        ctx.storage.delete("alice", EntityKind::Task, removed.id).await.unwrap();

        let mut conn = ctx.storage.pool().acquire().await.unwrap();
        let changes = ServerStorage::changes_since_in(&mut conn, "alice", 1).await.unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, removed.id);
        assert!(changes[0].entity.is_none());
        assert_eq!(changes[0].revision, 3);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_id_still_leaves_tombstone() {
        let ctx = setup().await;
        let id = Uuid::new_v4();

        assert!(!ctx.storage.delete("alice", EntityKind::Habit, id).await.unwrap());
        assert_eq!(ctx.storage.revision("alice").await.unwrap(), 1);
    }
}
