use std::collections::HashMap;

use uuid::Uuid;

use super::{ChangeAction, ChangeEntry, LoggedAt};
use crate::models::EntityKind;

/// The net change for one entity after collapsing its ledger entries.
#[derive(Debug, Clone, PartialEq)]
pub struct CollapsedChange {
    pub kind: EntityKind,
    pub id: Uuid,
    pub action: ChangeAction,
    /// Every entry that folded into this change, oldest first.
    pub entries: Vec<ChangeEntry>,
}

impl CollapsedChange {
    pub fn first_logged_at(&self) -> LoggedAt {
        self.entries.first().map(|e| e.logged_at).unwrap_or_default()
    }

    pub fn last_logged_at(&self) -> LoggedAt {
        self.entries.last().map(|e| e.logged_at).unwrap_or_default()
    }
}

/// Reduces ledger entries to one net action per `(kind, id)`.
///
/// A delete anywhere in the run wins outright. Otherwise an insert anywhere
/// means the server has never seen the entity, so the run ships as an insert
/// carrying the latest values; a run of updates ships as an update.
///
/// Output is ordered by each entity's earliest entry. Input must be sorted by
/// `logged_at`, as returned by `ChangeLedger::unpushed_since`.
pub fn collapse(entries: &[ChangeEntry]) -> Vec<CollapsedChange> {
    let mut index: HashMap<(EntityKind, Uuid), usize> = HashMap::new();
    let mut changes: Vec<CollapsedChange> = Vec::new();

    for entry in entries {
        let key = (entry.entity_kind, entry.entity_id);
        match index.get(&key) {
            Some(&pos) => {
                let change = &mut changes[pos];
                change.action = merge_action(change.action, entry.action);
                change.entries.push(entry.clone());
            }
            None => {
                index.insert(key, changes.len());
                changes.push(CollapsedChange {
                    kind: entry.entity_kind,
                    id: entry.entity_id,
                    action: entry.action,
                    entries: vec![entry.clone()],
                });
            }
        }
    }

    changes
}

fn merge_action(current: ChangeAction, next: ChangeAction) -> ChangeAction {
    match (current, next) {
        (ChangeAction::Delete, _) | (_, ChangeAction::Delete) => ChangeAction::Delete,
        (ChangeAction::Insert, _) | (_, ChangeAction::Insert) => ChangeAction::Insert,
        _ => ChangeAction::Update,
    }
}
