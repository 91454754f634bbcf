//! Auto-sync for CLI commands.
//!
//! Runs one reconciliation round before read commands and after write
//! commands when `auto_sync` is enabled in the configuration.

use sqlx::SqlitePool;

use daybook_core::error::{RemoteError, StoreError};
use daybook_core::sync::{HttpRemote, RoundError, RoundStatus, SyncReconciler};

use crate::config::Config;
use crate::db::{SqliteChangeLedger, SqliteLocalStore, SyncSettings};

/// The reconciler wired to the local SQLite database and the HTTP server.
pub type LocalReconciler =
    SyncReconciler<SqliteChangeLedger, SqliteLocalStore, SyncSettings, HttpRemote>;

pub fn build_reconciler(config: &Config, pool: &SqlitePool) -> Result<LocalReconciler, RemoteError> {
    let (Some(url), Some(key)) = (&config.sync.server_url, &config.sync.api_key) else {
        return Err(RemoteError::NotConfigured);
    };
    let remote = HttpRemote::new(url.as_str(), key.as_str(), config.sync.request_timeout())?;

    Ok(SyncReconciler::new(
        SqliteChangeLedger::new(pool.clone()),
        SqliteLocalStore::new(pool.clone()),
        SyncSettings::new(pool.clone()),
        remote,
    )
    .with_exchange_timeout(config.sync.request_timeout()))
}

/// Builds the reconciler for an explicit `daybook sync`.
///
/// Offline mode blocks explicit rounds the same way it blocks auto-sync.
pub async fn manual_reconciler(
    config: &Config,
    pool: &SqlitePool,
) -> Result<LocalReconciler, SyncStartError> {
    if SyncSettings::new(pool.clone()).offline_mode().await? {
        return Err(SyncStartError::OfflineMode);
    }
    Ok(build_reconciler(config, pool)?)
}

/// Why an explicit sync could not start.
#[derive(Debug)]
pub enum SyncStartError {
    OfflineMode,
    Remote(RemoteError),
    Store(StoreError),
}

impl std::fmt::Display for SyncStartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStartError::OfflineMode => write!(
                f,
                "offline mode is on. Run `daybook sync offline off` to sync with the server."
            ),
            SyncStartError::Remote(e) => write!(f, "{}", e),
            SyncStartError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncStartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncStartError::OfflineMode => None,
            SyncStartError::Remote(e) => Some(e),
            SyncStartError::Store(e) => Some(e),
        }
    }
}

impl From<RemoteError> for SyncStartError {
    fn from(e: RemoteError) -> Self {
        SyncStartError::Remote(e)
    }
}

impl From<StoreError> for SyncStartError {
    fn from(e: StoreError) -> Self {
        SyncStartError::Store(e)
    }
}

/// Performs auto-sync if enabled, online and the server is reachable.
///
/// Failures are logged and otherwise ignored: the command the user ran has
/// already succeeded or will run against local data.
pub async fn try_auto_sync(config: &Config, pool: &SqlitePool) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    match SyncSettings::new(pool.clone()).offline_mode().await {
        Ok(false) => {}
        Ok(true) => {
            tracing::debug!("offline mode enabled, skipping auto-sync");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "auto-sync: could not read offline setting");
            return;
        }
    }

    let reconciler = match build_reconciler(config, pool) {
        Ok(reconciler) => reconciler,
        Err(e) => {
            tracing::warn!(error = %e, "auto-sync: could not build sync client");
            return;
        }
    };

    if let Some(url) = &config.sync.server_url {
        if !daybook_core::sync::check_server(url).await {
            tracing::warn!("auto-sync: server unreachable, skipping");
            return;
        }
    }

    match reconciler.run_round().await {
        Ok(RoundStatus::Completed(report)) if !report.skipped.is_empty() => {
            for skipped in &report.skipped {
                tracing::warn!(error = %skipped, "auto-sync: entity left for next round");
            }
        }
        Ok(_) => {}
        Err(e @ RoundError::ServerRejected { .. }) => {
            tracing::warn!(error = %e, "auto-sync: server rejected changes");
        }
        Err(e) => {
            tracing::warn!(error = %e, "auto-sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::db::test_support::setup_db;
    use crate::server::test_support::{spawn_server, SHARED_KEY};
    use daybook_core::ledger::ChangeLedger;
    use daybook_core::models::{EntityKind, Task};
    use daybook_core::sync::{ExchangeOutcome, LocalStore};
    use std::path::PathBuf;

    fn config(sync: SyncConfig) -> Config {
        Config {
            database_path: crate::config::ConfigValue::new(
                PathBuf::from("unused.db"),
                crate::config::ConfigSource::Default,
            ),
            config_file: None,
            sync,
        }
    }

    #[tokio::test]
    async fn test_build_reconciler_requires_configuration() {
        let db = setup_db().await;
        let result = build_reconciler(&config(SyncConfig::default()), &db.pool);
        assert!(matches!(result, Err(RemoteError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_auto_sync_against_unreachable_server_changes_nothing() {
        let db = setup_db().await;
        let store = SqliteLocalStore::new(db.pool.clone());
        store
            .save(&Task::new("Queued").into())
            .await
            .unwrap();

        let cfg = config(SyncConfig {
            server_url: Some("http://127.0.0.1:9".to_string()),
            api_key: Some("key".to_string()),
            auto_sync: true,
            ..SyncConfig::default()
        });
        try_auto_sync(&cfg, &db.pool).await;

        let ledger = SqliteChangeLedger::new(db.pool.clone());
        assert_eq!(ledger.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_manual_sync_refused_in_offline_mode() {
        let (url, _server_dir) = spawn_server().await;
        let cfg = config(SyncConfig {
            server_url: Some(url),
            api_key: Some(SHARED_KEY.to_string()),
            ..SyncConfig::default()
        });

        let db = setup_db().await;
        let task = Task::new("Stays on this device");
        SqliteLocalStore::new(db.pool.clone())
            .save(&task.into())
            .await
            .unwrap();
        let settings = SyncSettings::new(db.pool.clone());
        settings.set_offline_mode(true).await.unwrap();

        let result = manual_reconciler(&cfg, &db.pool).await;
        assert!(matches!(result, Err(SyncStartError::OfflineMode)));
        let ledger = SqliteChangeLedger::new(db.pool.clone());
        assert_eq!(ledger.pending_count().await.unwrap(), 1);

        settings.set_offline_mode(false).await.unwrap();
        let status = manual_reconciler(&cfg, &db.pool)
            .await
            .unwrap()
            .run_round()
            .await
            .unwrap();
        assert!(matches!(status, RoundStatus::Completed(report) if report.sent == 1));
        assert_eq!(ledger.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_manual_sync_requires_configuration() {
        let db = setup_db().await;
        let result = manual_reconciler(&config(SyncConfig::default()), &db.pool).await;
        assert!(matches!(
            result,
            Err(SyncStartError::Remote(RemoteError::NotConfigured))
        ));
    }

    #[tokio::test]
    async fn test_offline_write_reaches_second_device() {
        let (url, _server_dir) = spawn_server().await;
        let cfg = config(SyncConfig {
            server_url: Some(url),
            api_key: Some(SHARED_KEY.to_string()),
            auto_sync: true,
            ..SyncConfig::default()
        });

        let laptop = setup_db().await;
        let task = Task::new("Written on the train");
        SqliteLocalStore::new(laptop.pool.clone())
            .save(&task.clone().into())
            .await
            .unwrap();

        let status = build_reconciler(&cfg, &laptop.pool)
            .unwrap()
            .run_round()
            .await
            .unwrap();
        let RoundStatus::Completed(report) = status else {
            panic!("expected a completed round");
        };
        assert_eq!(report.sent, 1);
        assert_eq!(report.outcome, ExchangeOutcome::NoChange);
        assert_eq!(
            SqliteChangeLedger::new(laptop.pool.clone())
                .pending_count()
                .await
                .unwrap(),
            0
        );

        let phone = setup_db().await;
        try_auto_sync(&cfg, &phone.pool).await;

        let pulled = SqliteLocalStore::new(phone.pool.clone())
            .get_by_id(EntityKind::Task, task.id)
            .await
            .unwrap();
        assert_eq!(pulled, Some(task.into()));
        assert_eq!(
            SqliteChangeLedger::new(phone.pool.clone())
                .pending_count()
                .await
                .unwrap(),
            0
        );
    }
}
