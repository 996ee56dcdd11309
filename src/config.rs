//! Configuration management for opqueue using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "opqueue.db";

const DEFAULT_EXECUTION_INTERVAL_MS: u64 = 5_000;
const DEFAULT_POST_WAKE_DELAY_MS: u64 = 200;
const DEFAULT_POST_CREATE_DELAY_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 15_000;

/// Get delay from environment variable, with default fallback.
fn delay_from_env(env_var: &str, default_ms: u64) -> u64 {
    std::env::var(env_var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_ms)
}

/// Timing constants for the execution loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Settling window after the last enqueue before a batch is selected.
    pub execution_interval_ms: u64,
    /// Grace delay after each batch so imminent enqueues become visible.
    pub post_wake_delay_ms: u64,
    /// How long a newly created record stays invisible after ID translation.
    pub post_create_delay_ms: u64,
    /// Backoff added per retry of a failed batch.
    pub retry_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            execution_interval_ms: delay_from_env(
                "OPQUEUE_EXECUTION_INTERVAL_MS",
                DEFAULT_EXECUTION_INTERVAL_MS,
            ),
            post_wake_delay_ms: delay_from_env(
                "OPQUEUE_POST_WAKE_DELAY_MS",
                DEFAULT_POST_WAKE_DELAY_MS,
            ),
            post_create_delay_ms: delay_from_env(
                "OPQUEUE_POST_CREATE_DELAY_MS",
                DEFAULT_POST_CREATE_DELAY_MS,
            ),
            retry_backoff_ms: delay_from_env("OPQUEUE_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl QueueConfig {
    pub fn execution_interval(&self) -> Duration {
        Duration::from_millis(self.execution_interval_ms)
    }

    pub fn post_wake_delay(&self) -> Duration {
        Duration::from_millis(self.post_wake_delay_ms)
    }

    pub fn post_create_delay(&self) -> Duration {
        Duration::from_millis(self.post_create_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Apply environment overrides on top of file-provided values.
    pub fn with_env_overrides(self) -> Self {
        Self {
            execution_interval_ms: delay_from_env(
                "OPQUEUE_EXECUTION_INTERVAL_MS",
                self.execution_interval_ms,
            ),
            post_wake_delay_ms: delay_from_env("OPQUEUE_POST_WAKE_DELAY_MS", self.post_wake_delay_ms),
            post_create_delay_ms: delay_from_env(
                "OPQUEUE_POST_CREATE_DELAY_MS",
                self.post_create_delay_ms,
            ),
            retry_backoff_ms: delay_from_env("OPQUEUE_RETRY_BACKOFF_MS", self.retry_backoff_ms),
        }
    }
}

/// File-backed configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (relative paths resolve against the config file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database file path (overrides data_dir/opqueue.db).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Execution loop timing.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers opqueue config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("opqueue").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        config.queue = config.queue.with_env_overrides();
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => {
                toml::from_str(contents).map_err(|e| format!("Failed to parse TOML config: {}", e))
            }
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_path = Some(self.resolve_path(database, base_dir));
        }
        settings.queue = self.queue.clone();
    }
}

/// Effective runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Explicit database path (overrides data_dir/opqueue.db).
    pub database_path: Option<PathBuf>,
    pub queue: QueueConfig,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("opqueue");

        Self {
            data_dir,
            database_path: None,
            queue: QueueConfig::default(),
        }
    }
}

impl Settings {
    /// Full path to the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_DATABASE_FILENAME))
    }

    /// Ensure the directory holding the database exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        let db_path = self.database_path();
        let dir = db_path.parent().unwrap_or(&self.data_dir);
        std::fs::create_dir_all(dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("Failed to create data directory '{}': {}", dir.display(), e),
            )
        })
    }
}

/// Options for loading settings.
#[derive(Debug, Default, Clone)]
pub struct LoadOptions {
    /// Explicit config file (skips discovery).
    pub config_path: Option<PathBuf>,
    /// Explicit database path.
    pub database: Option<PathBuf>,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        }),
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(database) = options.database {
        settings.database_path = Some(database);
    }

    // OPQUEUE_DATABASE environment variable takes highest precedence
    if let Some(database) = std::env::var("OPQUEUE_DATABASE")
        .ok()
        .filter(|s| !s.is_empty())
    {
        tracing::debug!("Using OPQUEUE_DATABASE from environment: {}", database);
        settings.database_path = Some(PathBuf::from(database));
    }

    (settings, config)
}
