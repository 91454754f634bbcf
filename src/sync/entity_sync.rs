//! Sync-aware entity repository.
//!
//! Every read and write goes through the [`CacheFreshnessDispatcher`]:
//! - Reads try the server first and cache what they get, or use the local
//!   store when offline.
//! - Writes go straight to the server when it is reachable. Otherwise they
//!   land in the local store together with a ledger entry, and the next
//!   sync round pushes them.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use daybook_core::dispatch::{CacheFreshnessDispatcher, DataSource, FetchContext, FetchError};
use daybook_core::error::RemoteError;
use daybook_core::models::{Entity, EntityKind, Syncable};
use daybook_core::sync::{ConnectivityProbe, HttpRemote, LocalStore};

use crate::config::SyncConfig;
use crate::db::{SqliteLocalStore, SyncSettings};

pub struct SyncedRepository {
    store: SqliteLocalStore,
    settings: SyncSettings,
    remote: Option<HttpRemote>,
    dispatcher: CacheFreshnessDispatcher,
}

/// Builds the HTTP client for a configured server, if there is one.
pub fn remote_from_config(sync: &SyncConfig) -> Option<HttpRemote> {
    let (Some(url), Some(key)) = (&sync.server_url, &sync.api_key) else {
        return None;
    };
    match HttpRemote::new(url.as_str(), key.as_str(), sync.request_timeout()) {
        Ok(remote) => Some(remote),
        Err(e) => {
            tracing::warn!(error = %e, "could not build sync client, working locally");
            None
        }
    }
}

impl SyncedRepository {
    pub fn new(pool: SqlitePool, sync: &SyncConfig) -> Self {
        let mut dispatcher = CacheFreshnessDispatcher::new(sync.request_timeout());
        if let Some(max_age) = sync.cache_max_age() {
            dispatcher = dispatcher.with_max_age(max_age);
        }
        Self::with_remote(pool, remote_from_config(sync), dispatcher)
    }

    pub fn with_remote(
        pool: SqlitePool,
        remote: Option<HttpRemote>,
        dispatcher: CacheFreshnessDispatcher,
    ) -> Self {
        Self {
            store: SqliteLocalStore::new(pool.clone()),
            settings: SyncSettings::new(pool),
            remote,
            dispatcher,
        }
    }

    /// Current offline setting, connectivity and fetch time for `kind`.
    ///
    /// Connectivity is only probed when offline mode is off and a server is
    /// configured.
    pub async fn fetch_context(
        &self,
        kind: EntityKind,
        force_refresh: bool,
    ) -> Result<FetchContext, FetchError> {
        let local = |e: daybook_core::error::StoreError| FetchError::LocalUnavailable(e.to_string());

        let offline_mode_enabled = self.settings.offline_mode().await.map_err(local)?;
        let network_available = match (&self.remote, offline_mode_enabled) {
            (Some(remote), false) => remote.is_network_available().await,
            _ => false,
        };
        let last_fetch_at = self.settings.last_fetch_at(kind).await.map_err(local)?;

        Ok(FetchContext {
            offline_mode_enabled,
            network_available,
            last_fetch_at,
            force_refresh,
        })
    }

    pub async fn list<T: Syncable>(&self, force_refresh: bool) -> Result<Vec<T>, FetchError> {
        let ctx = self.fetch_context(T::KIND, force_refresh).await?;
        self.list_in(&ctx).await
    }

    pub async fn get<T: Syncable>(&self, id: Uuid, force_refresh: bool) -> Result<Option<T>, FetchError> {
        let ctx = self.fetch_context(T::KIND, force_refresh).await?;
        self.get_in(&ctx, id).await
    }

    pub async fn save<T: Syncable>(&self, value: T) -> Result<T, FetchError> {
        let ctx = self.fetch_context(T::KIND, false).await?;
        self.save_in(&ctx, value).await
    }

    /// Returns false when the entity did not exist anywhere.
    pub async fn delete<T: Syncable>(&self, id: Uuid) -> Result<bool, FetchError> {
        let ctx = self.fetch_context(T::KIND, false).await?;
        self.delete_in::<T>(&ctx, id).await
    }

    fn remote(&self) -> Result<&HttpRemote, RemoteError> {
        self.remote.as_ref().ok_or(RemoteError::NotConfigured)
    }

    async fn list_in<T: Syncable>(&self, ctx: &FetchContext) -> Result<Vec<T>, FetchError> {
        let kind = T::KIND;
        let remote = self.remote();
        let store = &self.store;

        let fetched = self
            .dispatcher
            .execute_traced(
                ctx,
                move || async move { remote?.list(kind).await },
                move || async move { store.list(kind).await },
            )
            .await?;

        let entities = match fetched.source {
            DataSource::Remote | DataSource::RemoteFallback => {
                self.cache_listing(kind, fetched.value).await
            }
            DataSource::Local | DataSource::LocalFallback => fetched.value,
        };
        Ok(entities.into_iter().filter_map(T::from_entity).collect())
    }

    /// Caches a server listing and returns the local view, which still
    /// includes local edits not pushed yet.
    async fn cache_listing(&self, kind: EntityKind, remote: Vec<Entity>) -> Vec<Entity> {
        if let Err(e) = self.store.cache_remote(kind, &remote).await {
            tracing::warn!(%kind, error = %e, "failed to cache remote listing");
            return remote;
        }
        if let Err(e) = self.settings.record_fetch(kind, Utc::now()).await {
            tracing::warn!(%kind, error = %e, "failed to record fetch time");
        }
        match self.store.list(kind).await {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "failed to re-read local cache");
                remote
            }
        }
    }

    async fn get_in<T: Syncable>(&self, ctx: &FetchContext, id: Uuid) -> Result<Option<T>, FetchError> {
        let kind = T::KIND;
        let remote = self.remote();
        let store = &self.store;

        let fetched = self
            .dispatcher
            .execute_traced(
                ctx,
                move || async move { remote?.get(kind, id).await },
                move || async move { store.get_by_id(kind, id).await },
            )
            .await?;

        let entity = match fetched.source {
            DataSource::Remote | DataSource::RemoteFallback => {
                self.cache_single(kind, id, fetched.value).await
            }
            DataSource::Local | DataSource::LocalFallback => fetched.value,
        };
        Ok(entity.and_then(T::from_entity))
    }

    /// Local edits that are not pushed yet win over the server copy.
    async fn cache_single(&self, kind: EntityKind, id: Uuid, remote: Option<Entity>) -> Option<Entity> {
        match self.store.has_pending(kind, id).await {
            Ok(true) => match self.store.get_by_id(kind, id).await {
                Ok(local) => return local,
                Err(e) => tracing::warn!(%kind, %id, error = %e, "failed to read pending local copy"),
            },
            Ok(false) => {
                let cached = match &remote {
                    Some(entity) => self.store.store_fetched(entity).await,
                    None => self.store.forget(kind, id).await,
                };
                if let Err(e) = cached {
                    tracing::warn!(%kind, %id, error = %e, "failed to cache remote copy");
                }
            }
            Err(e) => tracing::warn!(%kind, %id, error = %e, "failed to check pending changes"),
        }
        remote
    }

    async fn save_in<T: Syncable>(&self, ctx: &FetchContext, value: T) -> Result<T, FetchError> {
        let entity = value.into_entity();
        let remote = self.remote();
        let store = &self.store;
        let outgoing = &entity;

        let fetched = self
            .dispatcher
            .execute_traced(
                ctx,
                move || async move { remote?.put(outgoing).await },
                move || async move { store.save(outgoing).await.map(|_| outgoing.clone()) },
            )
            .await?;

        if matches!(fetched.source, DataSource::Remote | DataSource::RemoteFallback) {
            if let Err(e) = self.store.store_fetched(&fetched.value).await {
                tracing::warn!(kind = %entity.kind(), id = %entity.id(), error = %e, "saved remotely but not cached");
            }
        }

        T::from_entity(fetched.value).ok_or_else(|| {
            FetchError::RemoteUnavailable(format!("server answered with a different kind than {}", T::KIND))
        })
    }

    async fn delete_in<T: Syncable>(&self, ctx: &FetchContext, id: Uuid) -> Result<bool, FetchError> {
        let kind = T::KIND;
        let remote = self.remote();
        let store = &self.store;

        let fetched = self
            .dispatcher
            .execute_traced(
                ctx,
                move || async move { remote?.delete(kind, id).await },
                move || async move { store.delete(kind, id).await.map(|entry| entry.is_some()) },
            )
            .await?;

        if !matches!(fetched.source, DataSource::Remote | DataSource::RemoteFallback) {
            return Ok(fetched.value);
        }

        // Pending local changes must end in a Delete entry, or the next round
        // would try to resolve an entity that no longer exists.
        let local = match self.store.has_pending(kind, id).await {
            Ok(true) => self.store.delete(kind, id).await.map(|entry| entry.is_some()),
            Ok(false) => self.store.forget(kind, id).await.map(|_| false),
            Err(e) => Err(e),
        };
        match local {
            Ok(found_locally) => Ok(fetched.value || found_locally),
            Err(e) => {
                tracing::warn!(%kind, %id, error = %e, "deleted remotely but local copy remains");
                Ok(fetched.value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_db;
    use crate::db::SqliteChangeLedger;
    use crate::server::test_support::{spawn_server, SHARED_KEY};
    use chrono::NaiveDate;
    use daybook_core::ledger::{ChangeAction, ChangeLedger};
    use daybook_core::models::{JournalEntry, Task};
    use std::time::Duration;

    fn dispatcher() -> CacheFreshnessDispatcher {
        CacheFreshnessDispatcher::new(Duration::from_secs(2))
    }

    /// A client for a port nothing listens on.
    fn unreachable_remote() -> HttpRemote {
        HttpRemote::new("http://127.0.0.1:9", "key", Duration::from_secs(1)).unwrap()
    }

    fn server_remote(url: &str) -> HttpRemote {
        HttpRemote::new(url, SHARED_KEY, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_online_save_caches_server_copy_without_ledger_entry() {
        let (url, _server_dir) = spawn_server().await;
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), Some(server_remote(&url)), dispatcher());

        let ctx = repo.fetch_context(EntityKind::Task, false).await.unwrap();
        assert!(ctx.network_available);

        let task = repo.save_in(&ctx, Task::new("Written online")).await.unwrap();

        let on_server = server_remote(&url).get(EntityKind::Task, task.id).await.unwrap();
        assert_eq!(on_server, Some(task.clone().into()));
        let cached = repo.store.get_by_id(EntityKind::Task, task.id).await.unwrap();
        assert_eq!(cached, Some(task.into()));
        let ledger = SqliteChangeLedger::new(db.pool.clone());
        assert_eq!(ledger.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_local_edit_wins_over_server_copy() {
        let (url, _server_dir) = spawn_server().await;
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), Some(server_remote(&url)), dispatcher());

        let task = Task::new("Buy milk");
        server_remote(&url).put(&task.clone().into()).await.unwrap();

        let mut edited = task.clone();
        edited.title = "Buy oat milk".to_string();
        edited.updated_at = Utc::now();
        repo.store.save(&edited.clone().into()).await.unwrap();

        let fetched: Option<Task> = repo.get_in(&FetchContext::online(), task.id).await.unwrap();
        assert_eq!(fetched, Some(edited.clone()));

        let local = repo.store.get_by_id(EntityKind::Task, task.id).await.unwrap();
        assert_eq!(local, Some(edited.into()));
        assert!(repo.store.has_pending(EntityKind::Task, task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_online_delete_with_pending_changes_records_delete() {
        let (url, _server_dir) = spawn_server().await;
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), Some(server_remote(&url)), dispatcher());

        let task = Task::new("Cancel dentist");
        server_remote(&url).put(&task.clone().into()).await.unwrap();
        repo.store.save(&task.clone().into()).await.unwrap();

        assert!(repo.delete_in::<Task>(&FetchContext::online(), task.id).await.unwrap());

        assert_eq!(server_remote(&url).get(EntityKind::Task, task.id).await.unwrap(), None);
        assert_eq!(repo.store.get_by_id(EntityKind::Task, task.id).await.unwrap(), None);
        let actions: Vec<ChangeAction> = SqliteChangeLedger::new(db.pool.clone())
            .unpushed_since(0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![ChangeAction::Insert, ChangeAction::Delete]);
    }

    #[tokio::test]
    async fn test_recent_fetch_serves_local_until_refresh() {
        let (url, _server_dir) = spawn_server().await;
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(
            db.pool.clone(),
            Some(server_remote(&url)),
            dispatcher().with_max_age(Duration::from_secs(3600)),
        );

        let task = Task::new("Only on the server");
        server_remote(&url).put(&task.clone().into()).await.unwrap();
        repo.settings.record_fetch(EntityKind::Task, Utc::now()).await.unwrap();

        let cached: Vec<Task> = repo.list(false).await.unwrap();
        assert!(cached.is_empty());

        let refreshed: Vec<Task> = repo.list(true).await.unwrap();
        assert_eq!(refreshed, vec![task]);
    }

    #[tokio::test]
    async fn test_configured_remote_reports_key_owner() {
        let (url, _server_dir) = spawn_server().await;
        let sync = SyncConfig {
            server_url: Some(url),
            api_key: Some(SHARED_KEY.to_string()),
            ..SyncConfig::default()
        };

        let remote = remote_from_config(&sync).unwrap();
        assert_eq!(remote.fetch_identity().await.unwrap().user_id, "alice");

        assert!(remote_from_config(&SyncConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_offline_mode_writes_locally_with_ledger_entry() {
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), Some(unreachable_remote()), dispatcher());
        SyncSettings::new(db.pool.clone()).set_offline_mode(true).await.unwrap();

        let ctx = repo.fetch_context(EntityKind::Task, false).await.unwrap();
        assert!(ctx.offline_mode_enabled);
        assert!(!ctx.network_available);

        let task = repo.save(Task::new("Offline task")).await.unwrap();
        let listed: Vec<Task> = repo.list(false).await.unwrap();
        assert_eq!(listed, vec![task.clone()]);

        let pending = SqliteChangeLedger::new(db.pool.clone()).unpushed_since(0).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, task.id);
        assert_eq!(pending[0].action, ChangeAction::Insert);
    }

    #[tokio::test]
    async fn test_unconfigured_remote_is_never_available() {
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), None, dispatcher());

        let ctx = repo.fetch_context(EntityKind::Habit, true).await.unwrap();
        assert!(!ctx.offline_mode_enabled);
        assert!(!ctx.network_available);
        assert!(ctx.force_refresh);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), Some(unreachable_remote()), dispatcher());

        // Pretend the probe said yes, so the remote call itself fails.
        let ctx = FetchContext::online();
        let entry = JournalEntry::new(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(), "Rainy", "stayed in");
        let saved = repo.save_in(&ctx, entry.clone()).await.unwrap();
        assert_eq!(saved, entry);

        let listed: Vec<JournalEntry> = repo.list_in(&ctx).await.unwrap();
        assert_eq!(listed, vec![entry.clone()]);

        let fetched: Option<JournalEntry> = repo.get_in(&ctx, entry.id).await.unwrap();
        assert_eq!(fetched, Some(entry));
    }

    #[tokio::test]
    async fn test_offline_delete_records_delete() {
        let db = setup_db().await;
        let repo = SyncedRepository::with_remote(db.pool.clone(), None, dispatcher());

        let task = repo.save(Task::new("Temporary")).await.unwrap();
        assert!(repo.delete::<Task>(task.id).await.unwrap());
        assert!(!repo.delete::<Task>(task.id).await.unwrap());
        assert!(repo.get::<Task>(task.id, false).await.unwrap().is_none());

        let actions: Vec<ChangeAction> = SqliteChangeLedger::new(db.pool.clone())
            .unpushed_since(0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![ChangeAction::Insert, ChangeAction::Delete]);
    }
}
