//! Collaborator interfaces the reconciler depends on.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::protocol::{ItemsByKind, SyncRequest, SyncResponse};
use crate::error::{RemoteError, StoreError};
use crate::ledger::LoggedAt;
use crate::models::{Entity, EntityKind};

/// Persisted sync position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Newest ledger timestamp known to be pushed and acknowledged.
    pub last_synced_at: LoggedAt,
    /// Server revision of the last applied response.
    pub remote_revision: i64,
}

/// Local entity storage as seen by the reconciler.
pub trait LocalStore: Send + Sync {
    fn get_by_id(
        &self,
        kind: EntityKind,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Entity>, StoreError>> + Send;

    /// Writes authoritative remote state in one atomic step. Must not
    /// create ledger entries. Returns the number of items applied.
    fn apply_remote(
        &self,
        items: &ItemsByKind,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

pub trait CursorStore: Send + Sync {
    fn load(&self) -> impl Future<Output = Result<SyncCursor, StoreError>> + Send;

    fn save(&self, cursor: SyncCursor) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The server side of a reconciliation round.
pub trait RemoteAuthority: Send + Sync {
    fn exchange(
        &self,
        request: &SyncRequest,
    ) -> impl Future<Output = Result<SyncResponse, RemoteError>> + Send;
}

pub trait ConnectivityProbe: Send + Sync {
    fn is_network_available(&self) -> impl Future<Output = bool> + Send;
}

/// Cursor kept in memory; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    cursor: Arc<Mutex<SyncCursor>>,
}

impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<SyncCursor, StoreError> {
        Ok(*self.cursor.lock().await)
    }

    async fn save(&self, cursor: SyncCursor) -> Result<(), StoreError> {
        *self.cursor.lock().await = cursor;
        Ok(())
    }
}
