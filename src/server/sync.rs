//! Server half of a reconciliation round.
//!
//! Applies a client batch and answers with everything the client has not
//! seen yet, all in one transaction.

use std::collections::HashSet;

use uuid::Uuid;

use daybook_core::ledger::ChangeAction;
use daybook_core::models::EntityKind;
use daybook_core::sync::{ItemsByKind, SyncItem, SyncRequest, SyncResponse};

use super::storage::{ServerStorage, ServerStorageError, WriteOutcome};

/// Merges `request` into `owner`'s data.
///
/// The response holds every change made after `since_revision` by anyone
/// else, plus the current server copy of any item that lost its conflict.
/// Items this request stored are not echoed back.
pub async fn reconcile(
    storage: &ServerStorage,
    owner: &str,
    request: &SyncRequest,
) -> Result<SyncResponse, ServerStorageError> {
    let mut tx = storage.pool().begin().await?;

    let mut written: HashSet<(EntityKind, Uuid)> = HashSet::new();
    let mut corrections = ItemsByKind::new();
    let mut received = 0usize;

    for (kind, items) in &request.batch.items {
        for item in items {
            received += 1;
            if item.action == ChangeAction::Delete {
                ServerStorage::tombstone_in(&mut tx, owner, *kind, item.id).await?;
                written.insert((*kind, item.id));
                continue;
            }

            let Some(entity) = item.entity.as_ref().filter(|e| e.kind() == *kind && e.id() == item.id) else {
                tracing::warn!(%kind, id = %item.id, "ignoring malformed sync item");
                continue;
            };

            match ServerStorage::upsert_in(&mut tx, owner, entity).await? {
                WriteOutcome::Stored(_) => {
                    written.insert((*kind, item.id));
                }
                WriteOutcome::Stale(current) => {
                    corrections
                        .entry(*kind)
                        .or_default()
                        .push(SyncItem::upsert(ChangeAction::Update, current));
                }
                WriteOutcome::Deleted => {
                    corrections
                        .entry(*kind)
                        .or_default()
                        .push(SyncItem::delete(item.id));
                }
            }
        }
    }

    let changes = ServerStorage::changes_since_in(&mut tx, owner, request.since_revision).await?;
    let revision = ServerStorage::revision_in(&mut tx, owner).await?;
    tx.commit().await?;

    let mut items = corrections;
    for change in changes {
        if written.contains(&(change.kind, change.id)) {
            continue;
        }
        let list = items.entry(change.kind).or_default();
        if list.iter().any(|item| item.id == change.id) {
            continue;
        }
        list.push(match change.entity {
            Some(entity) => SyncItem::upsert(ChangeAction::Update, entity),
            None => SyncItem::delete(change.id),
        });
    }
    items.retain(|_, list| !list.is_empty());

    tracing::info!(
        owner,
        received,
        returned = items.values().map(Vec::len).sum::<usize>(),
        revision,
        "reconciled sync batch"
    );

    if items.is_empty() {
        Ok(SyncResponse::NoChange { revision })
    } else {
        Ok(SyncResponse::Merged { items, revision })
    }
}
