//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand, ValueEnum};
use sqlx::SqlitePool;

use daybook_core::error::StoreError;
use daybook_core::ledger::{ChangeLedger, LedgerError};
use daybook_core::sync::{check_server, CursorStore, ExchangeOutcome, RoundError, RoundStatus};

use daybook::config::Config;
use daybook::db::{SqliteChangeLedger, SyncSettings};
use daybook::sync::{manual_reconciler, remote_from_config, SyncStartError};

/// Sync with remote server
///
/// Without a subcommand, runs one sync round. Refused while offline mode is on.
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, pending changes and server status
    Status,

    /// Turn offline mode on or off
    Offline {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Remove pushed changes that are older than the sync cursor
    Compact,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl SyncCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(pool, config).await,
            Some(SyncSubcommand::Status) => self.status(pool, config).await,
            Some(SyncSubcommand::Offline { state }) => self.offline(pool, *state).await,
            Some(SyncSubcommand::Compact) => self.compact(pool).await,
        }
    }

    async fn sync(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let reconciler = manual_reconciler(config, pool).await?;

        println!("Syncing with server...");
        println!();

        let report = match reconciler.run_round().await? {
            RoundStatus::Completed(report) => report,
            RoundStatus::Coalesced => {
                println!("A sync is already running.");
                return Ok(());
            }
        };

        println!("  ✓ sent {} change(s)", report.sent);
        println!("  ✓ applied {} change(s) from server", report.applied);
        for skipped in &report.skipped {
            println!("  ✗ kept for next sync: {}", skipped);
        }

        println!();
        match report.outcome {
            ExchangeOutcome::Merged => println!("Sync complete."),
            ExchangeOutcome::NoChange if report.sent == 0 => println!("Already up to date."),
            ExchangeOutcome::NoChange => println!("Sync complete. Nothing new on the server."),
        }

        Ok(())
    }

    async fn status(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let settings = SyncSettings::new(pool.clone());
        let ledger = SqliteChangeLedger::new(pool.clone());
        let offline = settings.offline_mode().await?;
        let cursor = settings.load().await?;
        let pending = ledger.pending_count().await?;

        println!("Offline mode:    {}", if offline { "on" } else { "off" });
        println!("Pending changes: {}", pending);
        println!("Cursor:          {} (server revision {})", cursor.last_synced_at, cursor.remote_revision);
        println!();

        let (Some(server_url), Some(api_key)) = (&config.sync.server_url, &config.sync.api_key) else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  DAYBOOK_SYNC_URL");
            println!("  DAYBOOK_SYNC_API_KEY");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        println!("API Key:   {}...", api_key.chars().take(8).collect::<String>());
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();

        print!("Server status: ");
        if !check_server(server_url).await {
            println!("✗ unreachable");
            return Ok(());
        }
        println!("✓ connected");

        if let Some(remote) = remote_from_config(&config.sync) {
            match remote.fetch_identity().await {
                Ok(identity) => println!("Signed in as:  {}", identity.user_id),
                Err(e) => println!("Signed in as:  ✗ {}", e),
            }
        }

        Ok(())
    }

    async fn offline(&self, pool: &SqlitePool, state: Toggle) -> Result<(), SyncCommandError> {
        let enabled = matches!(state, Toggle::On);
        SyncSettings::new(pool.clone()).set_offline_mode(enabled).await?;
        if enabled {
            println!("Offline mode on. Changes stay local until you turn it off.");
        } else {
            println!("Offline mode off.");
        }
        Ok(())
    }

    async fn compact(&self, pool: &SqlitePool) -> Result<(), SyncCommandError> {
        let cursor = SyncSettings::new(pool.clone()).load().await?;
        let removed = SqliteChangeLedger::new(pool.clone())
            .compact(cursor.last_synced_at)
            .await?;
        println!("Removed {} pushed change(s).", removed);
        Ok(())
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Start(SyncStartError),
    Round(RoundError),
    Store(StoreError),
    Ledger(LedgerError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Start(e) => write!(f, "{}", e),
            SyncCommandError::Round(e) => write!(f, "sync failed: {}", e),
            SyncCommandError::Store(e) => write!(f, "{}", e),
            SyncCommandError::Ledger(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Start(e) => Some(e),
            SyncCommandError::Round(e) => Some(e),
            SyncCommandError::Store(e) => Some(e),
            SyncCommandError::Ledger(e) => Some(e),
        }
    }
}

impl From<SyncStartError> for SyncCommandError {
    fn from(e: SyncStartError) -> Self {
        SyncCommandError::Start(e)
    }
}

impl From<RoundError> for SyncCommandError {
    fn from(e: RoundError) -> Self {
        SyncCommandError::Round(e)
    }
}

impl From<StoreError> for SyncCommandError {
    fn from(e: StoreError) -> Self {
        SyncCommandError::Store(e)
    }
}

impl From<LedgerError> for SyncCommandError {
    fn from(e: LedgerError) -> Self {
        SyncCommandError::Ledger(e)
    }
}
