//! # Ledger Configuration
//!
//! Configuration for the storage engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MANDI_DB_PATH=/data/ledger.db                                      │
//! │     MANDI_CACHE_TTL_MS=30000                                           │
//! │     MANDI_FLUSH_DELAY_MS=100                                           │
//! │     MANDI_BACKUP_INTERVAL_SECS=60                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ledger/ledger.toml (Linux)                               │
//! │     ~/Library/Application Support/com.mandi.ledger/ledger.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # ledger.toml
//! database_path = "/home/shop/.local/share/ledger/ledger.db"
//! cache_ttl_ms = 30000
//! flush_delay_ms = 100
//! backup_interval_secs = 60
//! max_connections = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// Marker path for an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

fn default_cache_ttl() -> u64 {
    30_000
}

fn default_flush_delay() -> u64 {
    100
}

fn default_backup_interval() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

// =============================================================================
// Ledger Config
// =============================================================================

/// Storage engine configuration.
///
/// ## Example
/// ```rust
/// use mandi_store::LedgerConfig;
/// use std::time::Duration;
///
/// let config = LedgerConfig::new("/tmp/ledger.db")
///     .flush_delay(Duration::from_millis(250))
///     .backup_interval(None);
/// assert_eq!(config.flush_delay_ms, 250);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "LedgerConfig::default_database_path")]
    pub database_path: PathBuf,

    /// How long a cached read stays fresh.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,

    /// Delay between a buffered write and its flush.
    #[serde(default = "default_flush_delay")]
    pub flush_delay_ms: u64,

    /// Period of the emergency backup task. `0` disables it.
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: Self::default_database_path(),
            cache_ttl_ms: default_cache_ttl(),
            flush_delay_ms: default_flush_delay(),
            backup_interval_secs: default_backup_interval(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl LedgerConfig {
    /// Creates a configuration for the given database file with default timings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LedgerConfig {
            database_path: path.into(),
            ..Self::default()
        }
    }

    /// Creates an in-memory configuration (for testing).
    ///
    /// The periodic backup task is disabled; tests call `emergency_backup`
    /// directly.
    pub fn in_memory() -> Self {
        LedgerConfig {
            database_path: PathBuf::from(IN_MEMORY),
            backup_interval_secs: 0,
            max_connections: 1,
            connect_timeout_secs: 5,
            ..Self::default()
        }
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the backup period; `None` disables the periodic task.
    pub fn backup_interval(mut self, interval: Option<Duration>) -> Self {
        self.backup_interval_secs = interval.map(|d| d.as_secs()).unwrap_or(0);
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads configuration from file (if present), then applies environment
    /// overrides and validates.
    pub fn load(config_path: Option<PathBuf>) -> StoreResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), falling back to defaults on any failure.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> StoreResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| StoreError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| StoreError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Ledger config saved");
        Ok(())
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("database_path must not be empty".into()));
        }
        if self.cache_ttl_ms == 0 {
            return Err(StoreError::InvalidConfig("cache_ttl_ms must be positive".into()));
        }
        if self.flush_delay_ms > self.cache_ttl_ms {
            return Err(StoreError::InvalidConfig(format!(
                "flush_delay_ms ({}) must not exceed cache_ttl_ms ({})",
                self.flush_delay_ms, self.cache_ttl_ms
            )));
        }
        if self.max_connections == 0 {
            return Err(StoreError::InvalidConfig("max_connections must be at least 1".into()));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MANDI_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database_path = PathBuf::from(path);
        }

        if let Ok(ttl) = std::env::var("MANDI_CACHE_TTL_MS") {
            match ttl.parse::<u64>() {
                Ok(ms) => self.cache_ttl_ms = ms,
                Err(_) => warn!(value = %ttl, "Ignoring invalid MANDI_CACHE_TTL_MS"),
            }
        }

        if let Ok(delay) = std::env::var("MANDI_FLUSH_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) => self.flush_delay_ms = ms,
                Err(_) => warn!(value = %delay, "Ignoring invalid MANDI_FLUSH_DELAY_MS"),
            }
        }

        if let Ok(interval) = std::env::var("MANDI_BACKUP_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.backup_interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid MANDI_BACKUP_INTERVAL_SECS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "mandi", "ledger").map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    fn default_database_path() -> PathBuf {
        directories::ProjectDirs::from("com", "mandi", "ledger")
            .map(|dirs| dirs.data_dir().join("ledger.db"))
            .unwrap_or_else(|| PathBuf::from("ledger.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }

    pub fn cache_ttl_duration(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn flush_delay_duration(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Backup period, `None` when the periodic task is disabled.
    pub fn backup_interval_duration(&self) -> Option<Duration> {
        (self.backup_interval_secs > 0).then(|| Duration::from_secs(self.backup_interval_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
