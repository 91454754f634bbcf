//! Daybook Sync Server
//!
//! Stores the authoritative copy of every user's tasks, habits, workouts
//! and journal entries, and reconciles batches pushed by offline clients.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DAYBOOK_PORT`: Port to listen on (default: 8080)
//! - `DAYBOOK_SERVER_DB`: SQLite database file (default: ~/.local/share/daybook-server/server.db)
//! - `DAYBOOK_SERVER_CONFIG`: Path to config file (default: ~/.config/daybook-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "user1"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daybook::server::{router, ApiKeyStore, AppState, ServerStorage};

/// Server configuration
struct Config {
    port: u16,
    database_path: PathBuf,
    config_path: PathBuf,
}

impl Config {
    fn from_env() -> Self {
        let port = std::env::var("DAYBOOK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let database_path = std::env::var("DAYBOOK_SERVER_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("daybook-server")
                    .join("server.db")
            });

        let config_path = std::env::var("DAYBOOK_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("daybook-server")
                    .join("config.yaml")
            });

        Self {
            port,
            database_path,
            config_path,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daybook=info,daybook_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    tracing::info!("Database: {}", config.database_path.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let storage = match ServerStorage::open(&config.database_path).await {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to open server database: {}", e);
            std::process::exit(1);
        }
    };

    let state = AppState {
        api_keys: Arc::new(ApiKeyStore::load(&config.config_path)),
        storage,
    };

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
