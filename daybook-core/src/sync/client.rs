//! HTTP client for the Daybook server.
//!
//! Speaks JSON over the CRUD endpoints (`/api/{kind}`) and the
//! reconciliation endpoint (`POST /api/sync`). Authenticates with a bearer
//! API key. Every request is bounded by the configured timeout.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use super::protocol::{SyncRequest, SyncResponse};
use super::store::{ConnectivityProbe, RemoteAuthority};
use crate::error::RemoteError;
use crate::models::{Entity, EntityKind};

/// Timeout for the connectivity probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Identity returned by `GET /me`.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    server_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl HttpRemote {
    pub fn new(
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            server_url: server_url.into(),
            api_key: api_key.into(),
            request_timeout,
        })
    }

    /// Builds an absolute URL, defaulting to `http://` for bare hosts.
    pub fn build_url(&self, path: &str) -> String {
        let base = self.server_url.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}{}", base, path)
        } else {
            format!("http://{}{}", base, path)
        }
    }

    fn entity_url(&self, kind: EntityKind, id: Option<Uuid>) -> String {
        match id {
            Some(id) => self.build_url(&format!("/api/{}/{}", kind, id)),
            None => self.build_url(&format!("/api/{}", kind)),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.request_timeout)
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Unavailable(e.to_string())
        }
    }

    /// Turns a non-2xx response into [`RemoteError::Rejected`].
    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    /// True when `GET /health` answers 2xx within a short timeout.
    pub async fn health(&self) -> bool {
        let result = self
            .client
            .get(self.build_url("/health"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success())
    }

    pub async fn fetch_identity(&self) -> Result<Identity, RemoteError> {
        let response = self
            .client
            .get(self.build_url("/me"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check(response).await?;
        response.json().await.map_err(|e| self.map_send_error(e))
    }

    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, RemoteError> {
        let response = self
            .client
            .get(self.entity_url(kind, None))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check(response).await?;
        response.json().await.map_err(|e| self.map_send_error(e))
    }

    pub async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Entity>, RemoteError> {
        let response = self
            .client
            .get(self.entity_url(kind, Some(id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        response.json().await.map(Some).map_err(|e| self.map_send_error(e))
    }

    /// Upserts one entity; returns the server's stored copy.
    pub async fn put(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        let response = self
            .client
            .put(self.entity_url(entity.kind(), Some(entity.id())))
            .bearer_auth(&self.api_key)
            .json(entity)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check(response).await?;
        response.json().await.map_err(|e| self.map_send_error(e))
    }

    /// Returns false when the server had no such entity.
    pub async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<bool, RemoteError> {
        let response = self
            .client
            .delete(self.entity_url(kind, Some(id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }
}

impl RemoteAuthority for HttpRemote {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse, RemoteError> {
        let response = self
            .client
            .post(self.build_url("/api/sync"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check(response).await?;
        response.json().await.map_err(|e| self.map_send_error(e))
    }
}

impl ConnectivityProbe for HttpRemote {
    async fn is_network_available(&self) -> bool {
        self.health().await
    }
}

/// Quick reachability check against a server URL.
pub async fn check_server(server_url: &str) -> bool {
    match HttpRemote::new(server_url, "", PROBE_TIMEOUT) {
        Ok(remote) => remote.health().await,
        Err(_) => false,
    }
}
