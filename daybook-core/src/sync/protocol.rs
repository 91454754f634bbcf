//! Wire types for the reconciliation endpoint (`POST /api/sync`).
//!
//! Encoded as JSON. Items are grouped by entity kind; deletes carry only
//! the id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{ChangeAction, LoggedAt};
use crate::models::{Entity, EntityKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: Uuid,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Entity>,
}

impl SyncItem {
    pub fn upsert(action: ChangeAction, entity: Entity) -> Self {
        Self {
            id: entity.id(),
            action,
            entity: Some(entity),
        }
    }

    pub fn delete(id: Uuid) -> Self {
        Self {
            id,
            action: ChangeAction::Delete,
            entity: None,
        }
    }
}

pub type ItemsByKind = BTreeMap<EntityKind, Vec<SyncItem>>;

/// Locally dirty entities for one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub items: ItemsByKind,
    /// `logged_at` of the newest ledger entry included.
    pub cursor: LoggedAt,
}

impl SyncBatch {
    pub fn new(cursor: LoggedAt) -> Self {
        Self {
            items: BTreeMap::new(),
            cursor,
        }
    }

    pub fn push(&mut self, kind: EntityKind, item: SyncItem) {
        self.items.entry(kind).or_default().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Server revision the client last applied.
    pub since_revision: i64,
    pub batch: SyncBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncResponse {
    /// Authoritative state the client has not seen: changes made elsewhere
    /// since `since_revision`, and the server copy of any sent item that
    /// lost its conflict.
    Merged { items: ItemsByKind, revision: i64 },
    /// Nothing for the client to apply.
    NoChange { revision: i64 },
}

impl SyncResponse {
    pub fn revision(&self) -> i64 {
        match self {
            SyncResponse::Merged { revision, .. } | SyncResponse::NoChange { revision } => {
                *revision
            }
        }
    }
}
