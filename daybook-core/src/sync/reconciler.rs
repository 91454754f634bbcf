//! One-round-at-a-time reconciliation between the local ledger and the server.
//!
//! A round walks Collecting → Resolving → Batching → Exchanging → Applying.
//! Nothing durable changes until the exchange succeeds; a failed exchange
//! leaves the cursor and every `pushed` flag exactly as they were, and the
//! next round resends the same entries.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

use super::error::{ResolutionError, RoundError};
use super::protocol::{ItemsByKind, SyncBatch, SyncItem, SyncRequest, SyncResponse};
use super::store::{CursorStore, LocalStore, RemoteAuthority, SyncCursor};
use crate::ledger::{collapse, ChangeAction, ChangeEntry, ChangeLedger, CollapsedChange, LoggedAt};
use crate::models::EntityKind;

const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Collecting,
    Resolving,
    Batching,
    Exchanging,
    Applying,
    /// The last round ended with an error.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Merged,
    NoChange,
}

/// Summary of a completed round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// Unpushed ledger entries read at the start of the round.
    pub collected: usize,
    /// Items sent after collapsing.
    pub sent: usize,
    pub skipped: Vec<ResolutionError>,
    /// Remote items written to the local store.
    pub applied: usize,
    pub outcome: ExchangeOutcome,
    pub cursor_before: SyncCursor,
    pub cursor_after: SyncCursor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundStatus {
    Completed(RoundReport),
    /// Another round was already running; this trigger was dropped.
    Coalesced,
}

struct Resolved {
    batch: SyncBatch,
    included: Vec<ChangeEntry>,
    skipped: Vec<ResolutionError>,
    /// Earliest `logged_at` among skipped changes.
    skipped_floor: Option<LoggedAt>,
}

pub struct SyncReconciler<L, S, C, R> {
    ledger: L,
    store: S,
    cursor: C,
    remote: R,
    exchange_timeout: Duration,
    in_flight: Mutex<()>,
    phase: watch::Sender<RoundPhase>,
}

impl<L, S, C, R> SyncReconciler<L, S, C, R>
where
    L: ChangeLedger,
    S: LocalStore,
    C: CursorStore,
    R: RemoteAuthority,
{
    pub fn new(ledger: L, store: S, cursor: C, remote: R) -> Self {
        let (phase, _) = watch::channel(RoundPhase::Idle);
        Self {
            ledger,
            store,
            cursor,
            remote,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            in_flight: Mutex::new(()),
            phase,
        }
    }

    pub fn with_exchange_timeout(mut self, exchange_timeout: Duration) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    pub fn phase(&self) -> RoundPhase {
        *self.phase.borrow()
    }

    /// Runs one reconciliation round, or returns [`RoundStatus::Coalesced`]
    /// if a round is already in progress.
    #[tracing::instrument(name = "sync_round", skip_all)]
    pub async fn run_round(&self) -> Result<RoundStatus, RoundError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("round already in flight, coalescing trigger");
            return Ok(RoundStatus::Coalesced);
        };

        let result = self.round().await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    collected = report.collected,
                    sent = report.sent,
                    skipped = report.skipped.len(),
                    applied = report.applied,
                    cursor = report.cursor_after.last_synced_at,
                    "sync round complete"
                );
                self.set_phase(RoundPhase::Idle);
            }
            Err(e) => {
                tracing::warn!(error = %e, "sync round failed");
                self.set_phase(RoundPhase::Failed);
            }
        }
        result.map(RoundStatus::Completed)
    }

    async fn round(&self) -> Result<RoundReport, RoundError> {
        let cursor_before = self.cursor.load().await.map_err(RoundError::Cursor)?;

        self.set_phase(RoundPhase::Collecting);
        let entries = self
            .ledger
            .unpushed_since(cursor_before.last_synced_at)
            .await?;
        let collected = entries.len();

        self.set_phase(RoundPhase::Resolving);
        let resolutions = self.resolve(collapse(&entries)).await;

        self.set_phase(RoundPhase::Batching);
        let resolved = build_batch(resolutions, cursor_before.last_synced_at);

        self.set_phase(RoundPhase::Exchanging);
        let request = SyncRequest {
            since_revision: cursor_before.remote_revision,
            batch: resolved.batch,
        };
        let sent = request.batch.len();
        let response = match timeout(self.exchange_timeout, self.remote.exchange(&request)).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(RoundError::TransportFailure(format!(
                    "exchange timed out after {:?}",
                    self.exchange_timeout
                )))
            }
        };

        self.set_phase(RoundPhase::Applying);
        let revision = response.revision();
        let (items, outcome) = match response {
            SyncResponse::Merged { items, .. } => (items, ExchangeOutcome::Merged),
            SyncResponse::NoChange { .. } => (ItemsByKind::new(), ExchangeOutcome::NoChange),
        };

        let items = self.without_dirty(items, &resolved.included).await?;
        let applied = if items.values().any(|v| !v.is_empty()) {
            self.store.apply_remote(&items).await?
        } else {
            0
        };

        self.ledger.mark_pushed(&resolved.included).await?;

        let cursor_after = SyncCursor {
            last_synced_at: advance_cursor(
                cursor_before.last_synced_at,
                request.batch.cursor,
                resolved.skipped_floor,
            ),
            remote_revision: cursor_before.remote_revision.max(revision),
        };
        self.cursor
            .save(cursor_after)
            .await
            .map_err(RoundError::Cursor)?;

        Ok(RoundReport {
            collected,
            sent,
            skipped: resolved.skipped,
            applied,
            outcome,
            cursor_before,
            cursor_after,
        })
    }

    /// Looks up current state for each collapsed change. A failure affects
    /// only that entity.
    async fn resolve(
        &self,
        changes: Vec<CollapsedChange>,
    ) -> Vec<(CollapsedChange, Result<SyncItem, ResolutionError>)> {
        let mut resolutions = Vec::with_capacity(changes.len());
        for change in changes {
            let item = match change.action {
                ChangeAction::Delete => Ok(SyncItem::delete(change.id)),
                action => match self.store.get_by_id(change.kind, change.id).await {
                    Ok(Some(entity)) => Ok(SyncItem::upsert(action, entity)),
                    Ok(None) => Err(ResolutionError::Missing {
                        kind: change.kind,
                        id: change.id,
                    }),
                    Err(e) => Err(ResolutionError::Store {
                        kind: change.kind,
                        id: change.id,
                        reason: e.to_string(),
                    }),
                },
            };
            if let Err(e) = &item {
                tracing::warn!(error = %e, "skipping entity in sync batch");
            }
            resolutions.push((change, item));
        }
        resolutions
    }

    /// Drops remote items for entities edited locally since collection, so
    /// an in-flight response cannot overwrite a newer local change.
    async fn without_dirty(
        &self,
        mut items: ItemsByKind,
        included: &[ChangeEntry],
    ) -> Result<ItemsByKind, RoundError> {
        let included: HashSet<i64> = included.iter().map(|e| e.seq).collect();
        let dirty: HashSet<(EntityKind, Uuid)> = self
            .ledger
            .unpushed_since(LoggedAt::MIN)
            .await?
            .into_iter()
            .filter(|e| !included.contains(&e.seq))
            .map(|e| (e.entity_kind, e.entity_id))
            .collect();

        if dirty.is_empty() {
            return Ok(items);
        }
        for (kind, list) in items.iter_mut() {
            list.retain(|item| {
                let keep = !dirty.contains(&(*kind, item.id));
                if !keep {
                    tracing::debug!(%kind, id = %item.id, "local change pending, not applying remote copy");
                }
                keep
            });
        }
        Ok(items)
    }

    fn set_phase(&self, phase: RoundPhase) {
        self.phase.send_replace(phase);
    }
}

fn build_batch(
    resolutions: Vec<(CollapsedChange, Result<SyncItem, ResolutionError>)>,
    cursor: LoggedAt,
) -> Resolved {
    let mut resolved = Resolved {
        batch: SyncBatch::new(cursor),
        included: Vec::new(),
        skipped: Vec::new(),
        skipped_floor: None,
    };

    for (change, item) in resolutions {
        match item {
            Ok(item) => {
                resolved.batch.cursor = resolved.batch.cursor.max(change.last_logged_at());
                resolved.batch.push(change.kind, item);
                resolved.included.extend(change.entries);
            }
            Err(e) => {
                let first = change.first_logged_at();
                resolved.skipped_floor = Some(resolved.skipped_floor.map_or(first, |f| f.min(first)));
                resolved.skipped.push(e);
            }
        }
    }

    resolved
}

/// New cursor after a successful exchange: never backwards, never past an
/// entry that was skipped this round.
fn advance_cursor(old: LoggedAt, batch: LoggedAt, skipped_floor: Option<LoggedAt>) -> LoggedAt {
    let target = match skipped_floor {
        Some(floor) => batch.min(floor - 1),
        None => batch,
    };
    old.max(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, StoreError};
    use crate::ledger::MemoryLedger;
    use crate::models::{Entity, Task};
    use crate::sync::store::MemoryCursorStore;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct MemoryStore {
        entities: Arc<Mutex<HashMap<(EntityKind, Uuid), Entity>>>,
        broken: Arc<Mutex<HashSet<Uuid>>>,
    }

    impl MemoryStore {
        async fn put(&self, entity: Entity) {
            self.entities
                .lock()
                .await
                .insert((entity.kind(), entity.id()), entity);
        }

        async fn get(&self, kind: EntityKind, id: Uuid) -> Option<Entity> {
            self.entities.lock().await.get(&(kind, id)).cloned()
        }
    }

    impl LocalStore for MemoryStore {
        async fn get_by_id(&self, kind: EntityKind, id: Uuid) -> Result<Option<Entity>, StoreError> {
            if self.broken.lock().await.contains(&id) {
                return Err(StoreError::Storage("disk I/O error".to_string()));
            }
            Ok(self.get(kind, id).await)
        }

        async fn apply_remote(&self, items: &ItemsByKind) -> Result<usize, StoreError> {
            let mut entities = self.entities.lock().await;
            let mut applied = 0;
            for (kind, list) in items {
                for item in list {
                    match (&item.action, &item.entity) {
                        (ChangeAction::Delete, _) => {
                            entities.remove(&(*kind, item.id));
                        }
                        (_, Some(entity)) => {
                            entities.insert((*kind, item.id), entity.clone());
                        }
                        (_, None) => continue,
                    }
                    applied += 1;
                }
            }
            Ok(applied)
        }
    }

    /// Scripted server: records requests and replays a canned response.
    #[derive(Clone)]
    struct FakeRemote {
        response: Arc<Mutex<Result<SyncResponse, RemoteError>>>,
        requests: Arc<Mutex<Vec<SyncRequest>>>,
        /// Entry logged into this ledger while the exchange is in flight.
        mid_round_write: Option<(MemoryLedger, Uuid)>,
        entered: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeRemote {
        fn answering(response: Result<SyncResponse, RemoteError>) -> Self {
            Self {
                response: Arc::new(Mutex::new(response)),
                requests: Arc::new(Mutex::new(Vec::new())),
                mid_round_write: None,
                entered: None,
            }
        }

        fn no_change() -> Self {
            Self::answering(Ok(SyncResponse::NoChange { revision: 1 }))
        }

        async fn last_request(&self) -> SyncRequest {
            self.requests.lock().await.last().cloned().unwrap()
        }
    }

    impl RemoteAuthority for FakeRemote {
        async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, RemoteError> {
            self.requests.lock().await.push(request.clone());
            if let Some((ledger, id)) = &self.mid_round_write {
                ledger
                    .record(EntityKind::Task, *id, ChangeAction::Update)
                    .await
                    .unwrap();
            }
            if let Some((entered, release)) = &self.entered {
                entered.notify_one();
                release.notified().await;
            }
            self.response.lock().await.clone()
        }
    }

    struct Harness {
        ledger: MemoryLedger,
        store: MemoryStore,
        cursor: MemoryCursorStore,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ledger: MemoryLedger::new(),
                store: MemoryStore::default(),
                cursor: MemoryCursorStore::default(),
            }
        }

        fn reconciler(
            &self,
            remote: FakeRemote,
        ) -> SyncReconciler<MemoryLedger, MemoryStore, MemoryCursorStore, FakeRemote> {
            SyncReconciler::new(
                self.ledger.clone(),
                self.store.clone(),
                self.cursor.clone(),
                remote,
            )
        }

        /// Local write path: store then ledger.
        async fn write(&self, task: &Task, action: ChangeAction) -> ChangeEntry {
            if action == ChangeAction::Delete {
                self.store
                    .entities
                    .lock()
                    .await
                    .remove(&(EntityKind::Task, task.id));
            } else {
                self.store.put(task.clone().into()).await;
            }
            self.ledger
                .record(EntityKind::Task, task.id, action)
                .await
                .unwrap()
        }
    }

    fn completed(report: RoundStatus) -> RoundReport {
        match report {
            RoundStatus::Completed(report) => report,
            RoundStatus::Coalesced => panic!("round was coalesced"),
        }
    }

    #[tokio::test]
    async fn test_insert_then_update_ships_one_insert_with_latest_values() {
        let h = Harness::new();
        let mut task = Task::new("Draft");
        h.write(&task, ChangeAction::Insert).await;
        task.title = "Final".to_string();
        h.write(&task, ChangeAction::Update).await;

        let remote = FakeRemote::no_change();
        let report = completed(h.reconciler(remote.clone()).run_round().await.unwrap());

        let request = remote.last_request().await;
        let items = &request.batch.items[&EntityKind::Task];
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action, ChangeAction::Insert);
        match &items[0].entity {
            Some(Entity::Task(sent)) => assert_eq!(sent.title, "Final"),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(report.collected, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.outcome, ExchangeOutcome::NoChange);
    }

    #[tokio::test]
    async fn test_update_then_delete_ships_delete() {
        let h = Harness::new();
        let task = Task::new("Temp");
        h.write(&task, ChangeAction::Update).await;
        h.write(&task, ChangeAction::Delete).await;

        let remote = FakeRemote::no_change();
        h.reconciler(remote.clone()).run_round().await.unwrap();

        let request = remote.last_request().await;
        let items = &request.batch.items[&EntityKind::Task];
        assert_eq!(items, &vec![SyncItem::delete(task.id)]);
    }

    #[tokio::test]
    async fn test_success_marks_pushed_and_advances_cursor() {
        let h = Harness::new();
        let mut last = None;
        for title in ["a", "b", "c"] {
            last = Some(h.write(&Task::new(title), ChangeAction::Insert).await);
        }
        let max_logged_at = last.unwrap().logged_at;

        let report = completed(
            h.reconciler(FakeRemote::no_change())
                .run_round()
                .await
                .unwrap(),
        );

        assert_eq!(report.cursor_after.last_synced_at, max_logged_at);
        assert_eq!(report.cursor_after.remote_revision, 1);
        assert_eq!(h.cursor.load().await.unwrap(), report.cursor_after);
        assert_eq!(h.ledger.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mid_round_write_is_left_for_next_round() {
        let h = Harness::new();
        let tasks: Vec<Task> = ["a", "b", "c"].into_iter().map(Task::new).collect();
        let mut max_logged_at = 0;
        for task in &tasks {
            max_logged_at = h.write(task, ChangeAction::Insert).await.logged_at;
        }

        let mut remote = FakeRemote::no_change();
        remote.mid_round_write = Some((h.ledger.clone(), tasks[0].id));
        let report = completed(h.reconciler(remote).run_round().await.unwrap());

        assert_eq!(report.collected, 3);
        assert_eq!(report.cursor_after.last_synced_at, max_logged_at);

        let pending = h.ledger.unpushed_since(max_logged_at).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, ChangeAction::Update);
        assert_eq!(pending[0].entity_id, tasks[0].id);

        let next = FakeRemote::no_change();
        let report = completed(h.reconciler(next.clone()).run_round().await.unwrap());
        assert_eq!(report.collected, 1);
        assert_eq!(next.last_request().await.batch.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_exchange_changes_nothing() {
        let h = Harness::new();
        h.write(&Task::new("a"), ChangeAction::Insert).await;
        h.write(&Task::new("b"), ChangeAction::Insert).await;
        let before_cursor = SyncCursor {
            last_synced_at: 0,
            remote_revision: 4,
        };
        h.cursor.save(before_cursor).await.unwrap();
        let before_entries = h.ledger.entries().await;

        let remote = FakeRemote::answering(Err(RemoteError::Unavailable(
            "connection reset".to_string(),
        )));
        let reconciler = h.reconciler(remote);
        let err = reconciler.run_round().await.unwrap_err();

        assert!(matches!(err, RoundError::TransportFailure(_)));
        assert_eq!(h.cursor.load().await.unwrap(), before_cursor);
        assert_eq!(h.ledger.entries().await, before_entries);
        assert_eq!(reconciler.phase(), RoundPhase::Failed);
    }

    #[tokio::test]
    async fn test_server_rejection_is_classified() {
        let h = Harness::new();
        h.write(&Task::new("a"), ChangeAction::Insert).await;

        let remote = FakeRemote::answering(Err(RemoteError::Rejected {
            status: 422,
            message: "missing entity".to_string(),
        }));
        let err = h.reconciler(remote).run_round().await.unwrap_err();

        assert!(matches!(err, RoundError::ServerRejected { status: 422, .. }));
        assert_eq!(h.ledger.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exchange_timeout_fails_round() {
        let h = Harness::new();
        h.write(&Task::new("a"), ChangeAction::Insert).await;

        let mut remote = FakeRemote::no_change();
        // Never released, so the exchange hangs until the timeout.
        remote.entered = Some((Arc::new(Notify::new()), Arc::new(Notify::new())));
        let reconciler = h
            .reconciler(remote)
            .with_exchange_timeout(Duration::from_millis(50));

        let err = reconciler.run_round().await.unwrap_err();
        assert!(matches!(err, RoundError::TransportFailure(_)));
        assert_eq!(h.ledger.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_isolated() {
        let h = Harness::new();
        let good = Task::new("good");
        let broken = Task::new("broken");
        let vanished = Task::new("vanished");
        let broken_entry = h.write(&broken, ChangeAction::Insert).await;
        h.write(&good, ChangeAction::Insert).await;
        h.ledger
            .record(EntityKind::Task, vanished.id, ChangeAction::Update)
            .await
            .unwrap();
        h.store.broken.lock().await.insert(broken.id);

        let remote = FakeRemote::no_change();
        let report = completed(h.reconciler(remote.clone()).run_round().await.unwrap());

        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .any(|e| matches!(e, ResolutionError::Missing { id, .. } if *id == vanished.id)));
        assert!(report
            .skipped
            .iter()
            .any(|e| matches!(e, ResolutionError::Store { id, .. } if *id == broken.id)));

        // Cursor stays below the first skipped entry so it is collected again.
        assert!(report.cursor_after.last_synced_at < broken_entry.logged_at);
        let retry = h
            .ledger
            .unpushed_since(report.cursor_after.last_synced_at)
            .await
            .unwrap();
        assert_eq!(retry.len(), 2);
        assert!(retry.iter().all(|e| e.entity_id != good.id));
    }

    #[tokio::test]
    async fn test_merged_response_is_applied_remote_wins() {
        let h = Harness::new();
        let mut local = Task::new("local title");
        h.write(&local, ChangeAction::Insert).await;

        local.title = "server title".to_string();
        let from_other_device = Task::new("from phone");
        let mut items = ItemsByKind::new();
        items.insert(
            EntityKind::Task,
            vec![
                SyncItem::upsert(ChangeAction::Update, local.clone().into()),
                SyncItem::upsert(ChangeAction::Insert, from_other_device.clone().into()),
            ],
        );
        let remote = FakeRemote::answering(Ok(SyncResponse::Merged { items, revision: 9 }));

        let report = completed(h.reconciler(remote).run_round().await.unwrap());

        assert_eq!(report.applied, 2);
        assert_eq!(report.outcome, ExchangeOutcome::Merged);
        assert_eq!(report.cursor_after.remote_revision, 9);
        assert_eq!(
            h.store.get(EntityKind::Task, local.id).await,
            Some(Entity::Task(local))
        );
        assert!(h
            .store
            .get(EntityKind::Task, from_other_device.id)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_remote_copy_not_applied_over_mid_round_edit() {
        let h = Harness::new();
        let mut task = Task::new("mine");
        h.write(&task, ChangeAction::Insert).await;

        let mut stale = task.clone();
        stale.title = "stale server copy".to_string();
        let mut items = ItemsByKind::new();
        items.insert(
            EntityKind::Task,
            vec![SyncItem::upsert(ChangeAction::Update, stale.into())],
        );
        let mut remote = FakeRemote::answering(Ok(SyncResponse::Merged { items, revision: 2 }));
        remote.mid_round_write = Some((h.ledger.clone(), task.id));
        task.title = "mine, edited".to_string();
        h.store.put(task.clone().into()).await;

        let report = completed(h.reconciler(remote).run_round().await.unwrap());

        assert_eq!(report.applied, 0);
        assert_eq!(
            h.store.get(EntityKind::Task, task.id).await,
            Some(Entity::Task(task))
        );
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_coalesced() {
        let h = Harness::new();
        h.write(&Task::new("a"), ChangeAction::Insert).await;

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut remote = FakeRemote::no_change();
        remote.entered = Some((entered.clone(), release.clone()));
        let reconciler = h.reconciler(remote.clone());

        let (first, second) = tokio::join!(reconciler.run_round(), async {
            entered.notified().await;
            let second = reconciler.run_round().await;
            release.notify_one();
            second
        });

        assert!(matches!(first.unwrap(), RoundStatus::Completed(_)));
        assert_eq!(second.unwrap(), RoundStatus::Coalesced);
        assert_eq!(remote.requests.lock().await.len(), 1);
        assert_eq!(reconciler.phase(), RoundPhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_ledger_still_pulls() {
        let h = Harness::new();
        let remote = FakeRemote::no_change();
        let report = completed(h.reconciler(remote.clone()).run_round().await.unwrap());

        assert!(remote.last_request().await.batch.is_empty());
        assert_eq!(report.sent, 0);
        assert_eq!(report.cursor_after.last_synced_at, 0);
    }

    #[test]
    fn test_advance_cursor_rules() {
        assert_eq!(advance_cursor(10, 50, None), 50);
        assert_eq!(advance_cursor(10, 50, Some(30)), 29);
        assert_eq!(advance_cursor(40, 50, Some(30)), 40);
        assert_eq!(advance_cursor(60, 50, None), 60);
    }
}
