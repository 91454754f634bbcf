//! HTTP API for the Daybook sync server.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /me`: Returns current user info
//! - `GET /api/{kind}`: Lists live entities of a kind
//! - `GET /api/{kind}/{id}`: Fetches one entity
//! - `PUT /api/{kind}/{id}`: Upserts one entity (last writer wins)
//! - `DELETE /api/{kind}/{id}`: Deletes one entity
//! - `POST /api/sync`: Reconciliation round
//!
//! Every endpoint except `/health` requires `Authorization: Bearer <key>`.

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use daybook_core::models::{Entity, EntityKind};
use daybook_core::sync::{SyncRequest, SyncResponse};

use super::storage::{ServerStorage, ServerStorageError, WriteOutcome};
use super::sync::reconcile;

// ============================================================================
// Authentication
// ============================================================================

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    user_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ApiKeysFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated user info, added to request extensions after auth
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    /// Load API keys from config file. A missing or broken file yields an
    /// empty store, so every authenticated request is refused.
    pub fn load(config_path: &FsPath) -> Self {
        let contents = match std::fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", config_path.display(), e);
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                return Self::default();
            }
        };

        match Self::parse(&contents) {
            Ok(store) => {
                tracing::info!("Loaded {} API key(s)", store.keys.len());
                store
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        let file: ApiKeysFile = serde_yaml::from_str(contents)?;
        let keys = file
            .api_keys
            .into_iter()
            .map(|entry| (entry.key, AuthUser { user_id: entry.user_id }))
            .collect();
        Ok(Self { keys })
    }

    pub fn with_key(mut self, key: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.keys.insert(key.into(), AuthUser { user_id: user_id.into() });
        self
    }

    /// Validate an API key and return the associated user
    fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub storage: ServerStorage,
}

/// Error body returned by every failing endpoint
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Authentication middleware
async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            )
        }
    };

    match state.api_keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    UnknownKind(String),
    NotFound(EntityKind, Uuid),
    BadRequest(String),
    Gone(EntityKind, Uuid),
    Storage(ServerStorageError),
}

impl From<ServerStorageError> for ApiError {
    fn from(e: ServerStorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::UnknownKind(kind) => {
                error_response(StatusCode::NOT_FOUND, "unknown_kind", format!("Unknown entity kind: {}", kind))
            }
            ApiError::NotFound(kind, id) => {
                error_response(StatusCode::NOT_FOUND, "not_found", format!("{} {} not found", kind, id))
            }
            ApiError::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Gone(kind, id) => {
                error_response(StatusCode::GONE, "deleted", format!("{} {} was deleted", kind, id))
            }
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage", "Internal storage error")
            }
        }
    }
}

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    kind.parse().map_err(|_| ApiError::UnknownKind(kind.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current user response
#[derive(Serialize)]
struct MeResponse {
    user_id: String,
}

async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
    })
}

async fn list_entities(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<Entity>>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.storage.list(&user.user_id, kind).await?))
}

async fn get_entity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<Entity>, ApiError> {
    let kind = parse_kind(&kind)?;
    state
        .storage
        .get(&user.user_id, kind, id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(kind, id))
}

/// Answers with the server's copy, which is the incoming one unless a newer
/// write was already stored.
async fn put_entity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(entity): Json<Entity>,
) -> Result<Json<Entity>, ApiError> {
    let kind = parse_kind(&kind)?;
    if entity.kind() != kind || entity.id() != id {
        return Err(ApiError::BadRequest(format!(
            "body is {} {}, path is {} {}",
            entity.kind(),
            entity.id(),
            kind,
            id
        )));
    }

    match state.storage.put(&user.user_id, &entity).await? {
        WriteOutcome::Stored(current) | WriteOutcome::Stale(current) => Ok(Json(current)),
        WriteOutcome::Deleted => Err(ApiError::Gone(kind, id)),
    }
}

async fn delete_entity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    if state.storage.delete(&user.user_id, kind, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(kind, id))
    }
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    Ok(Json(reconcile(&state.storage, &user.user_id, &request).await?))
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/me", get(me))
        .route("/api/sync", post(sync))
        .route("/api/{kind}", get(list_entities))
        .route(
            "/api/{kind}/{id}",
            get(get_entity).put(put_entity).delete(delete_entity),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Method;
    use daybook_core::models::Task;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestContext {
        app: Router,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::open(&temp_dir.path().join("server.db")).await.unwrap();
        let state = AppState {
            api_keys: Arc::new(ApiKeyStore::default().with_key("alice-key", "alice")),
            storage,
        };
        TestContext {
            app: router(state),
            _temp_dir: temp_dir,
        }
    }

    fn request(method: Method, uri: &str, body: Option<String>) -> Request {
        let builder = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer alice-key")
            .header(header::CONTENT_TYPE, "application/json");
        builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_api_keys() {
        let store = ApiKeyStore::parse("api_keys:\n  - key: abc\n    user_id: alice\n").unwrap();
        assert_eq!(
            store.validate("abc"),
            Some(AuthUser {
                user_id: "alice".to_string()
            })
        );
        assert_eq!(store.validate("nope"), None);
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let ctx = setup().await;
        let response = ctx
            .app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys_are_rejected() {
        let ctx = setup().await;

        let missing = ctx
            .app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let invalid = ctx
            .app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/me")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_returns_user() {
        let ctx = setup().await;
        let response = ctx.app.oneshot(request(Method::GET, "/me", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["user_id"], "alice");
    }

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let ctx = setup().await;
        let task = Task::new("Via API");
        let entity = Entity::from(task.clone());
        let uri = format!("/api/task/{}", task.id);

        let put = ctx
            .app
            .clone()
            .oneshot(request(Method::PUT, &uri, Some(serde_json::to_string(&entity).unwrap())))
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);
        assert_eq!(body_json::<Entity>(put).await, entity);

        let got = ctx.app.clone().oneshot(request(Method::GET, &uri, None)).await.unwrap();
        assert_eq!(body_json::<Entity>(got).await, entity);

        let listed = ctx
            .app
            .clone()
            .oneshot(request(Method::GET, "/api/task", None))
            .await
            .unwrap();
        assert_eq!(body_json::<Vec<Entity>>(listed).await, vec![entity.clone()]);

        let deleted = ctx.app.clone().oneshot(request(Method::DELETE, &uri, None)).await.unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = ctx
            .app
            .oneshot(request(Method::PUT, &uri, Some(serde_json::to_string(&entity).unwrap())))
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_put_with_mismatched_path_is_bad_request() {
        let ctx = setup().await;
        let entity = Entity::from(Task::new("Wrong place"));
        let uri = format!("/api/habit/{}", entity.id());

        let response = ctx
            .app
            .oneshot(request(Method::PUT, &uri, Some(serde_json::to_string(&entity).unwrap())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_kind_and_missing_entity() {
        let ctx = setup().await;

        let unknown = ctx
            .app
            .clone()
            .oneshot(request(Method::GET, "/api/recipes", None))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let missing = ctx
            .app
            .oneshot(request(Method::GET, &format!("/api/task/{}", Uuid::new_v4()), None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_endpoint_round_trip() {
        let ctx = setup().await;
        let sync_request = SyncRequest {
            since_revision: 0,
            batch: Default::default(),
        };

        let response = ctx
            .app
            .oneshot(request(
                Method::POST,
                "/api/sync",
                Some(serde_json::to_string(&sync_request).unwrap()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json::<SyncResponse>(response).await,
            SyncResponse::NoChange { revision: 0 }
        );
    }
}
