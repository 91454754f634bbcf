//! Server-side modules for the Daybook sync server.

pub mod api;
pub mod storage;
pub mod sync;

pub use api::{router, ApiKeyStore, AppState, AuthUser};
pub use storage::{ServerStorage, ServerStorageError, StoredEntity, WriteOutcome};
pub use sync::reconcile;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::{router, ApiKeyStore, AppState, ServerStorage};

    /// API key accepted by [`spawn_server`], owned by user `alice`.
    pub const SHARED_KEY: &str = "shared-key";

    /// Serves the full router on an ephemeral port. Returns its base URL.
    pub async fn spawn_server() -> (String, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::open(&temp_dir.path().join("server.db")).await.unwrap();
        let app = router(AppState {
            api_keys: Arc::new(ApiKeyStore::default().with_key(SHARED_KEY, "alice")),
            storage,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{}", addr), temp_dir)
    }
}
