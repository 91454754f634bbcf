use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityKind, Habit, JournalEntry, Task, WorkoutDay};

/// A synchronizable entity of any kind.
///
/// Serialized with an inline `kind` tag so a payload is self-describing
/// on the wire and in the server's storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Task(Task),
    Habit(Habit),
    WorkoutDay(WorkoutDay),
    JournalEntry(JournalEntry),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Task(_) => EntityKind::Task,
            Entity::Habit(_) => EntityKind::Habit,
            Entity::WorkoutDay(_) => EntityKind::WorkoutDay,
            Entity::JournalEntry(_) => EntityKind::JournalEntry,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Entity::Task(t) => t.id,
            Entity::Habit(h) => h.id,
            Entity::WorkoutDay(w) => w.id,
            Entity::JournalEntry(j) => j.id,
        }
    }

    /// Last modification time, used for last-writer-wins merging.
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Task(t) => t.updated_at,
            Entity::Habit(h) => h.updated_at,
            Entity::WorkoutDay(w) => w.updated_at,
            Entity::JournalEntry(j) => j.updated_at,
        }
    }
}

/// A feature model that can travel through the sync engine as an [`Entity`].
pub trait Syncable: Sized {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    fn into_entity(self) -> Entity;

    /// Returns `None` when the entity is of a different kind.
    fn from_entity(entity: Entity) -> Option<Self>;
}

macro_rules! impl_syncable {
    ($ty:ident, $kind:ident) => {
        impl Syncable for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn id(&self) -> Uuid {
                self.id
            }

            fn into_entity(self) -> Entity {
                Entity::$kind(self)
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$kind(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Entity {
            fn from(value: $ty) -> Self {
                Entity::$kind(value)
            }
        }
    };
}

impl_syncable!(Task, Task);
impl_syncable!(Habit, Habit);
impl_syncable!(WorkoutDay, WorkoutDay);
impl_syncable!(JournalEntry, JournalEntry);
