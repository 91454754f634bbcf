//! Cache-freshness dispatcher.
//!
//! Every feature repository routes its remote/local pair of operations
//! through [`CacheFreshnessDispatcher`], which picks a path from a
//! [`FetchContext`] and falls back to the other side when the first fails.

mod context;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;

use crate::error::RemoteError;

pub use context::{CacheDecision, FetchContext};

/// Classified dispatcher failure.
///
/// Only `BothFailed` reaches callers on the normal remote-then-local path;
/// `LocalUnavailable` surfaces when local was the only permitted path, and
/// the remote variants only for an explicit [`CacheDecision::UseRemote`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("remote rejected request with status {0}")]
    RemoteRejected(u16),
    #[error("local data unavailable: {0}")]
    LocalUnavailable(String),
    #[error("remote and local both failed (remote: {remote}; local: {local})")]
    BothFailed { remote: String, local: String },
}

impl From<RemoteError> for FetchError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Rejected { status, .. } => FetchError::RemoteRejected(status),
            other => FetchError::RemoteUnavailable(other.to_string()),
        }
    }
}

/// Which side produced a dispatched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Local,
    /// Remote was tried first and failed.
    LocalFallback,
    /// Local was tried first and failed.
    RemoteFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: DataSource,
}

/// Chooses between a remote and a local operation per call.
#[derive(Debug, Clone)]
pub struct CacheFreshnessDispatcher {
    request_timeout: Duration,
    max_age: Option<chrono::Duration>,
}

impl CacheFreshnessDispatcher {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            max_age: None,
        }
    }

    /// Serve from local while the last successful fetch is younger than
    /// `max_age`. Without this, `last_fetch_at` never gates the choice.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = chrono::Duration::from_std(max_age).ok();
        self
    }

    pub fn decide(&self, ctx: &FetchContext) -> CacheDecision {
        self.decide_at(ctx, Utc::now())
    }

    pub fn decide_at(&self, ctx: &FetchContext, now: DateTime<Utc>) -> CacheDecision {
        if ctx.offline_mode_enabled || !ctx.network_available {
            return CacheDecision::UseLocal;
        }
        if ctx.force_refresh {
            return CacheDecision::UseRemoteThenFallback;
        }
        if let (Some(max_age), Some(last)) = (self.max_age, ctx.last_fetch_at) {
            if now - last < max_age {
                return CacheDecision::UseLocalThenFallback;
            }
        }
        CacheDecision::UseRemoteThenFallback
    }

    /// Runs whichever of `remote` / `local` the context selects.
    pub async fn execute<T, R, RF, L, LF, E>(
        &self,
        ctx: &FetchContext,
        remote: R,
        local: L,
    ) -> Result<T, FetchError>
    where
        R: FnOnce() -> RF,
        RF: Future<Output = Result<T, RemoteError>>,
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_traced(ctx, remote, local)
            .await
            .map(|fetched| fetched.value)
    }

    /// Like [`execute`](Self::execute) but also reports where the value came from.
    pub async fn execute_traced<T, R, RF, L, LF, E>(
        &self,
        ctx: &FetchContext,
        remote: R,
        local: L,
    ) -> Result<Fetched<T>, FetchError>
    where
        R: FnOnce() -> RF,
        RF: Future<Output = Result<T, RemoteError>>,
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T, E>>,
        E: Display,
    {
        let decision = self.decide(ctx);
        tracing::debug!(?decision, ?ctx, "cache decision");
        self.run(decision, remote, local).await
    }

    /// Executes an already-made decision.
    pub async fn run<T, R, RF, L, LF, E>(
        &self,
        decision: CacheDecision,
        remote: R,
        local: L,
    ) -> Result<Fetched<T>, FetchError>
    where
        R: FnOnce() -> RF,
        RF: Future<Output = Result<T, RemoteError>>,
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T, E>>,
        E: Display,
    {
        match decision {
            CacheDecision::UseLocal => {
                let value = self
                    .run_local(local)
                    .await
                    .map_err(FetchError::LocalUnavailable)?;
                Ok(Fetched {
                    value,
                    source: DataSource::Local,
                })
            }
            CacheDecision::UseRemote => {
                let value = self.run_remote(remote).await?;
                Ok(Fetched {
                    value,
                    source: DataSource::Remote,
                })
            }
            CacheDecision::UseRemoteThenFallback => match self.run_remote(remote).await {
                Ok(value) => Ok(Fetched {
                    value,
                    source: DataSource::Remote,
                }),
                Err(remote_err) => {
                    tracing::warn!(error = %remote_err, "remote fetch failed, falling back to local");
                    match self.run_local(local).await {
                        Ok(value) => Ok(Fetched {
                            value,
                            source: DataSource::LocalFallback,
                        }),
                        Err(local_err) => Err(FetchError::BothFailed {
                            remote: remote_err.to_string(),
                            local: local_err,
                        }),
                    }
                }
            },
            CacheDecision::UseLocalThenFallback => match self.run_local(local).await {
                Ok(value) => Ok(Fetched {
                    value,
                    source: DataSource::Local,
                }),
                Err(local_err) => {
                    tracing::warn!(error = %local_err, "local read failed, falling back to remote");
                    match self.run_remote(remote).await {
                        Ok(value) => Ok(Fetched {
                            value,
                            source: DataSource::RemoteFallback,
                        }),
                        Err(remote_err) => Err(FetchError::BothFailed {
                            remote: remote_err.to_string(),
                            local: local_err,
                        }),
                    }
                }
            },
        }
    }

    async fn run_remote<T, R, RF>(&self, remote: R) -> Result<T, RemoteError>
    where
        R: FnOnce() -> RF,
        RF: Future<Output = Result<T, RemoteError>>,
    {
        match timeout(self.request_timeout, remote()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.request_timeout)),
        }
    }

    async fn run_local<T, L, LF, E>(&self, local: L) -> Result<T, String>
    where
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T, E>>,
        E: Display,
    {
        match timeout(self.request_timeout, local()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.request_timeout)),
        }
    }
}
