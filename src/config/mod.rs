use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

use crate::reconfigure::RemovalPolicy;
use crate::types::error::TaxonomyError;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum provider calls in flight during one run
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Top-level holding label for removed team members and suppliers
    #[serde(default = "default_archive_label")]
    pub archive_label: String,

    /// What to do with the label of a removed team member or supplier
    #[serde(default)]
    pub removal_policy: RemovalPolicy,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Backoff settings for transient provider failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Starting delay after a rate-limit response without a Retry-After hint
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

/// Provider detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// How long a DNS-based detection stays cached
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Identifier map storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_archive_label() -> String {
    "ARCHIVED".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_rate_limit_delay_ms() -> u64 {
    2_000
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            archive_label: default_archive_label(),
            removal_policy: RemovalPolicy::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl StorageSettings {
    /// Configured database path, or the platform default
    pub fn resolve_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }

        if cfg!(debug_assertions) {
            PathBuf::from(".sqlite/labels.db")
        } else {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mailbox-taxonomy")
                .join("labels.db")
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, TaxonomyError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| TaxonomyError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TaxonomyError> {
        if self.sync.max_concurrency == 0 {
            return Err(TaxonomyError::Config(
                "sync.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(TaxonomyError::Config(
                "sync.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.sync.archive_label.trim().is_empty() {
            return Err(TaxonomyError::Config(
                "sync.archive_label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailbox-taxonomy").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("mailbox-taxonomy")
                .join("config.toml"),
        );
        paths.push(home_dir.join(".mailbox-taxonomy.rc"));
    }

    paths
}

/// Initialize configuration from default paths
pub fn init_config() -> Result<(), TaxonomyError> {
    info!("Initializing configuration from default paths");

    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return init_config_from_path(&path);
        }
    }

    // No config found, initialize with defaults
    info!("No config file found, using defaults");
    set_config(AppConfig::default())
}

/// Initialize configuration from a specific path
pub fn init_config_from_path(path: &Path) -> Result<(), TaxonomyError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| TaxonomyError::Config(format!("Failed to read config: {}", e)))?;

    set_config(AppConfig::from_toml(&content)?)
}

/// Set the global configuration
fn set_config(config: AppConfig) -> Result<(), TaxonomyError> {
    match CONFIG.get() {
        Some(lock) => {
            let mut guard = lock
                .write()
                .map_err(|e| TaxonomyError::Config(format!("Failed to lock config: {}", e)))?;
            *guard = config;
        }
        None => {
            CONFIG.set(RwLock::new(config)).ok();
        }
    }
    Ok(())
}

/// Snapshot of the current configuration
pub fn get_config() -> Result<AppConfig, TaxonomyError> {
    let lock = CONFIG
        .get()
        .ok_or_else(|| TaxonomyError::Config("Configuration not initialized".to_string()))?;
    let guard = lock
        .read()
        .map_err(|e| TaxonomyError::Config(format!("Failed to lock config: {}", e)))?;
    Ok(guard.clone())
}

/// Check if configuration is initialized
pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}
