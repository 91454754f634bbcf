use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080" or "https://sync.example.com")
    pub server_url: Option<String>,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Sync before reads and after writes (default: false)
    #[serde(default)]
    pub auto_sync: bool,
    /// Upper bound for any single remote request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Serve reads from the local cache while the last fetch is younger than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_max_age_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            auto_sync: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_max_age_secs: None,
        }
    }
}

impl SyncConfig {
    /// Returns true if sync is configured (has both server_url and api_key)
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.api_key.is_some()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_max_age(&self) -> Option<Duration> {
        self.cache_max_age_secs.map(Duration::from_secs)
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// On-disk shape of `config.yaml`. Every key is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileLayer {
    database_path: Option<PathBuf>,
    sync: Option<SyncConfig>,
}

impl FileLayer {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self {
            database_path: ConfigValue::new(
                Self::default_data_dir().join("daybook.db"),
                ConfigSource::Default,
            ),
            config_file: None,
            sync: SyncConfig::default(),
        };

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            config.apply_file(&path, FileLayer::read(&path)?);
        }
        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    fn apply_file(&mut self, path: &Path, layer: FileLayer) {
        if let Some(db_path) = layer.database_path {
            // Relative paths are relative to the config file
            let resolved = match path.parent() {
                Some(dir) if db_path.is_relative() => dir.join(db_path),
                _ => db_path,
            };
            self.database_path = ConfigValue::new(resolved, ConfigSource::File);
        }
        if let Some(sync) = layer.sync {
            self.sync = sync;
        }
        self.config_file = Some(path.to_path_buf());
    }

    fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("DAYBOOK_DATABASE_PATH") {
            self.database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("DAYBOOK_SYNC_URL") {
            self.sync.server_url = Some(url);
        }
        if let Ok(key) = std::env::var("DAYBOOK_SYNC_API_KEY") {
            self.sync.api_key = Some(key);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if matches!(&self.sync.server_url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::Invalid("sync.server_url is empty".to_string()));
        }
        if matches!(&self.sync.api_key, Some(key) if key.trim().is_empty()) {
            return Err(ConfigError::Invalid("sync.api_key is empty".to_string()));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Platform config directory joined with `daybook`, e.g. `~/.config/daybook`.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("daybook")
    }

    /// Platform data directory joined with `daybook`, e.g. `~/.local/share/daybook`.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("daybook")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}
