//! Relay server configuration.
//!
//! Loaded from a TOML file with serde defaults for every field, so a
//! partial config (or none at all) still yields a runnable server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the config file
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Could not parse the config file contents
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server identity and transport settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rate limiting settings
    #[serde(default)]
    pub limits: LimitsConfig,

    /// HTTP endpoint settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Background cleanup settings
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// QR pairing settings
    #[serde(default)]
    pub pairing: PairingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// Server transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds to wait for the hello after a connection is accepted
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
}

fn default_max_connections() -> usize {
    1024
}

fn default_hello_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            hello_timeout_secs: default_hello_timeout_secs(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("parley.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// New connections allowed per remote node per minute
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,

    /// Events accepted per connection per second
    #[serde(default = "default_events_per_second")]
    pub events_per_second: u32,

    /// Pairing codes minted per minute across all callers
    #[serde(default = "default_pairings_per_minute")]
    pub pairings_per_minute: u32,
}

fn default_connections_per_minute() -> u32 {
    30
}

fn default_events_per_second() -> u32 {
    50
}

fn default_pairings_per_minute() -> u32 {
    60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_minute: default_connections_per_minute(),
            events_per_second: default_events_per_second(),
            pairings_per_minute: default_pairings_per_minute(),
        }
    }
}

/// HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whether the HTTP listener is enabled
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    /// TCP port for the HTTP listener
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            port: default_http_port(),
        }
    }
}

/// Background cleanup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Whether the periodic cleanup task runs
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,

    /// Seconds between cleanup sweeps
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// QR pairing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Seconds a pairing code stays valid after generation
    #[serde(default = "default_pairing_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_pairing_ttl_secs() -> u64 {
    120
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_pairing_ttl_secs(),
        }
    }
}
