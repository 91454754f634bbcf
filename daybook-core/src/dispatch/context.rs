use chrono::{DateTime, Utc};

/// Per-call inputs to the dispatcher, read fresh from settings each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchContext {
    pub offline_mode_enabled: bool,
    pub network_available: bool,
    /// When this kind was last fetched successfully from the remote.
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub force_refresh: bool,
}

impl FetchContext {
    pub fn online() -> Self {
        Self {
            network_available: true,
            ..Self::default()
        }
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Remote only; its failure is the caller's error.
    UseRemote,
    /// Local only; remote is never attempted.
    UseLocal,
    UseRemoteThenFallback,
    UseLocalThenFallback,
}
