//! Local entity store shared by the feature repositories and the reconciler.
//!
//! Local writes (`save`, `delete`) change the entity tables and append a
//! ledger entry in one transaction. Writes that originate from the server
//! (`apply_remote`, `cache_remote`, `store_fetched`) never touch the ledger.

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use daybook_core::error::StoreError;
use daybook_core::ledger::{ChangeAction, ChangeEntry};
use daybook_core::models::{Entity, EntityKind};
use daybook_core::sync::{ItemsByKind, LocalStore};

use super::{
    HabitRepository, JournalRepository, SqliteChangeLedger, TaskRepository, WorkoutRepository,
};

#[derive(Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Task => "tasks",
        EntityKind::Habit => "habits",
        EntityKind::WorkoutDay => "workout_days",
        EntityKind::JournalEntry => "journal_entries",
    }
}

async fn exists(conn: &mut SqliteConnection, kind: EntityKind, id: Uuid) -> Result<bool, sqlx::Error> {
    let query = format!("SELECT 1 FROM {} WHERE id = ?", table(kind));
    let row: Option<(i64,)> = sqlx::query_as(&query)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

async fn write_entity(conn: &mut SqliteConnection, entity: &Entity) -> Result<(), sqlx::Error> {
    match entity {
        Entity::Task(task) => TaskRepository::upsert(conn, task).await,
        Entity::Habit(habit) => HabitRepository::upsert(conn, habit).await,
        Entity::WorkoutDay(workout) => WorkoutRepository::upsert(conn, workout).await,
        Entity::JournalEntry(entry) => JournalRepository::upsert(conn, entry).await,
    }
}

async fn remove_entity(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: Uuid,
) -> Result<bool, sqlx::Error> {
    match kind {
        EntityKind::Task => TaskRepository::delete(conn, id).await,
        EntityKind::Habit => HabitRepository::delete(conn, id).await,
        EntityKind::WorkoutDay => WorkoutRepository::delete(conn, id).await,
        EntityKind::JournalEntry => JournalRepository::delete(conn, id).await,
    }
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError> {
        let pool = self.pool.clone();
        let entities = match kind {
            EntityKind::Task => TaskRepository::new(pool)
                .list()
                .await
                .map(|v| v.into_iter().map(Entity::from).collect()),
            EntityKind::Habit => HabitRepository::new(pool)
                .list()
                .await
                .map(|v| v.into_iter().map(Entity::from).collect()),
            EntityKind::WorkoutDay => WorkoutRepository::new(pool)
                .list()
                .await
                .map(|v| v.into_iter().map(Entity::from).collect()),
            EntityKind::JournalEntry => JournalRepository::new(pool)
                .list()
                .await
                .map(|v| v.into_iter().map(Entity::from).collect()),
        };
        entities.map_err(storage)
    }

    /// Upserts a locally edited entity and records `Insert` or `Update`.
    pub async fn save(&self, entity: &Entity) -> Result<ChangeEntry, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let action = if exists(&mut tx, entity.kind(), entity.id()).await.map_err(storage)? {
            ChangeAction::Update
        } else {
            ChangeAction::Insert
        };
        write_entity(&mut tx, entity).await.map_err(storage)?;
        let entry = SqliteChangeLedger::record_in(&mut tx, entity.kind(), entity.id(), action)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(entry)
    }

    /// Deletes a local entity and records `Delete`. Returns `None` when the
    /// entity did not exist, in which case nothing is recorded.
    pub async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<Option<ChangeEntry>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        if !remove_entity(&mut tx, kind, id).await.map_err(storage)? {
            return Ok(None);
        }
        let entry = SqliteChangeLedger::record_in(&mut tx, kind, id, ChangeAction::Delete)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(Some(entry))
    }

    /// Stores one server copy after a successful remote write.
    pub async fn store_fetched(&self, entity: &Entity) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        write_entity(&mut conn, entity).await.map_err(storage)
    }

    /// Drops the local copy after a successful remote delete.
    pub async fn forget(&self, kind: EntityKind, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        remove_entity(&mut conn, kind, id).await.map_err(storage)?;
        Ok(())
    }

    /// True when `id` has ledger entries not yet pushed.
    pub async fn has_pending(&self, kind: EntityKind, id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let dirty = SqliteChangeLedger::dirty_ids_in(&mut conn, kind)
            .await
            .map_err(storage)?;
        Ok(dirty.contains(&id))
    }

    /// Replaces the local copy of `kind` with a remote listing.
    ///
    /// Entities with unpushed local changes are left as they are, including
    /// local-only ones missing from the listing. Returns the number written.
    pub async fn cache_remote(&self, kind: EntityKind, entities: &[Entity]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let dirty = SqliteChangeLedger::dirty_ids_in(&mut tx, kind)
            .await
            .map_err(storage)?;

        let mut written = 0;
        for entity in entities.iter().filter(|e| e.kind() == kind) {
            if dirty.contains(&entity.id()) {
                continue;
            }
            write_entity(&mut tx, entity).await.map_err(storage)?;
            written += 1;
        }

        let query = format!("SELECT id FROM {}", table(kind));
        let local_ids: Vec<(String,)> = sqlx::query_as(&query)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?;
        for (id,) in local_ids {
            let id = super::parse_uuid(&id).map_err(storage)?;
            if !dirty.contains(&id) && !entities.iter().any(|e| e.id() == id) {
                remove_entity(&mut tx, kind, id).await.map_err(storage)?;
            }
        }

        tx.commit().await.map_err(storage)?;
        tracing::debug!(%kind, written, skipped = dirty.len(), "cached remote listing");
        Ok(written)
    }
}

impl LocalStore for SqliteLocalStore {
    async fn get_by_id(&self, kind: EntityKind, id: Uuid) -> Result<Option<Entity>, StoreError> {
        let pool = self.pool.clone();
        let entity = match kind {
            EntityKind::Task => TaskRepository::new(pool).get_by_id(id).await.map(|v| v.map(Entity::from)),
            EntityKind::Habit => HabitRepository::new(pool).get_by_id(id).await.map(|v| v.map(Entity::from)),
            EntityKind::WorkoutDay => WorkoutRepository::new(pool)
                .get_by_id(id)
                .await
                .map(|v| v.map(Entity::from)),
            EntityKind::JournalEntry => JournalRepository::new(pool)
                .get_by_id(id)
                .await
                .map(|v| v.map(Entity::from)),
        };
        entity.map_err(|e| match e {
            sqlx::Error::Decode(reason) => StoreError::Corrupt {
                id: id.to_string(),
                reason: reason.to_string(),
            },
            other => storage(other),
        })
    }

    /// Applies every item in one transaction: either all land or none do.
    async fn apply_remote(&self, items: &ItemsByKind) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut applied = 0;

        for (kind, list) in items {
            for item in list {
                match &item.entity {
                    Some(entity) => write_entity(&mut tx, entity).await.map_err(storage)?,
                    None => {
                        remove_entity(&mut tx, *kind, item.id).await.map_err(storage)?;
                    }
                }
                applied += 1;
            }
        }

        tx.commit().await.map_err(storage)?;
        Ok(applied)
    }
}
