use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{next_logged_at, ChangeAction, ChangeEntry, ChangeLedger, LedgerError, LoggedAt};
use crate::models::EntityKind;

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<ChangeEntry>,
    next_seq: i64,
    last_logged_at: LoggedAt,
}

/// In-memory ledger. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, pushed or not.
    pub async fn entries(&self) -> Vec<ChangeEntry> {
        self.state.lock().await.entries.clone()
    }
}

impl ChangeLedger for MemoryLedger {
    async fn record(
        &self,
        kind: EntityKind,
        id: Uuid,
        action: ChangeAction,
    ) -> Result<ChangeEntry, LedgerError> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        state.last_logged_at = next_logged_at(state.last_logged_at);

        let entry = ChangeEntry {
            seq: state.next_seq,
            entity_kind: kind,
            entity_id: id,
            action,
            logged_at: state.last_logged_at,
            pushed: false,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn unpushed_since(&self, cursor: LoggedAt) -> Result<Vec<ChangeEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| !e.pushed && e.logged_at > cursor)
            .cloned()
            .collect())
    }

    async fn mark_pushed(&self, entries: &[ChangeEntry]) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        for entry in state.entries.iter_mut() {
            if entries.iter().any(|e| e.seq == entry.seq) {
                entry.pushed = true;
            }
        }
        Ok(())
    }

    async fn compact(&self, cursor: LoggedAt) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|e| !(e.pushed && e.logged_at <= cursor));
        Ok((before - state.entries.len()) as u64)
    }

    async fn pending_count(&self) -> Result<u64, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.entries.iter().filter(|e| !e.pushed).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_assigns_increasing_timestamps() {
        let ledger = MemoryLedger::new();
        let id = Uuid::new_v4();

        let a = ledger.record(EntityKind::Task, id, ChangeAction::Insert).await.unwrap();
        let b = ledger.record(EntityKind::Task, id, ChangeAction::Update).await.unwrap();

        assert!(b.logged_at > a.logged_at);
        assert_eq!(b.seq, a.seq + 1);
    }

    #[tokio::test]
    async fn test_unpushed_since_filters_cursor_and_pushed() {
        let ledger = MemoryLedger::new();
        let id = Uuid::new_v4();
        let a = ledger.record(EntityKind::Task, id, ChangeAction::Insert).await.unwrap();
        let b = ledger.record(EntityKind::Task, id, ChangeAction::Update).await.unwrap();
        let c = ledger.record(EntityKind::Task, id, ChangeAction::Update).await.unwrap();

        ledger.mark_pushed(&[b.clone()]).await.unwrap();

        let all = ledger.unpushed_since(0).await.unwrap();
        assert_eq!(all, vec![a.clone(), c.clone()]);

        let after_a = ledger.unpushed_since(a.logged_at).await.unwrap();
        assert_eq!(after_a, vec![c]);
    }

    #[tokio::test]
    async fn test_mark_pushed_is_idempotent() {
        let ledger = MemoryLedger::new();
        let a = ledger
            .record(EntityKind::Habit, Uuid::new_v4(), ChangeAction::Insert)
            .await
            .unwrap();
        ledger
            .record(EntityKind::Habit, Uuid::new_v4(), ChangeAction::Insert)
            .await
            .unwrap();

        ledger.mark_pushed(&[a.clone()]).await.unwrap();
        let once = ledger.unpushed_since(0).await.unwrap();
        ledger.mark_pushed(&[a]).await.unwrap();
        let twice = ledger.unpushed_since(0).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(ledger.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_compact_keeps_unpushed_entries() {
        let ledger = MemoryLedger::new();
        let a = ledger
            .record(EntityKind::Task, Uuid::new_v4(), ChangeAction::Insert)
            .await
            .unwrap();
        let b = ledger
            .record(EntityKind::Task, Uuid::new_v4(), ChangeAction::Insert)
            .await
            .unwrap();
        ledger.mark_pushed(&[a]).await.unwrap();

        let removed = ledger.compact(b.logged_at).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.entries().await, vec![b]);
    }
}
