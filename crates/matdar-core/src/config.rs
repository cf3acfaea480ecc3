//! Configuration management for Matdar.
//!
//! This module provides configuration loading, saving, and defaults.
//! Configuration is stored in TOML format in a platform-appropriate location.

use crate::error::{MatdarError, Result};
use crate::reconcile::ChangeDetector;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure for Matdar.
///
/// ## Example Configuration File (matdar.toml)
///
/// ```toml
/// [general]
/// log_level = "info"
/// compress_cache = true
///
/// [sources]
/// snapshot = "https://example.org/roll/snapshot.json"
/// snapshot_version = "2024-11"
/// remote_url = "https://example.org/api/voters"
///
/// [sync]
/// interval_secs = 180
/// change_detection = "count"
///
/// [search]
/// page_size = 50
/// debounce_ms = 300
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Where records come from
    pub sources: SourcesConfig,

    /// Background refresh
    pub sync: SyncConfig,

    /// Query defaults
    pub search: SearchConfig,
}

/// General configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Cache directory (None = default location)
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// LZ4-compress the cached record set
    pub compress_cache: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            data_dir: None,
            log_level: "info".to_string(),
            compress_cache: true,
        }
    }
}

/// Data source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Bundled snapshot: a file path or an http(s) URL
    pub snapshot: Option<String>,

    /// Snapshot version, appended to snapshot URLs for cache busting
    pub snapshot_version: String,

    /// Remote record collection (None = offline only)
    pub remote_url: Option<String>,

    /// Timeout for remote requests
    pub request_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            snapshot: None,
            snapshot_version: "1".to_string(),
            remote_url: None,
            request_timeout_secs: 30,
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduled refreshes
    pub interval_secs: u64,

    /// Seconds between connectivity probes
    pub connectivity_interval_secs: u64,

    /// `host:port` probed for reachability (None = derived from remote_url)
    pub probe_address: Option<String>,

    /// How fetched data is compared with the cached set
    pub change_detection: ChangeDetector,

    /// Namespace for synthetic identifiers of remote batches
    pub batch_namespace: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            interval_secs: 180,
            connectivity_interval_secs: 15,
            probe_address: None,
            change_detection: ChangeDetector::Count,
            batch_namespace: "remote".to_string(),
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results per page
    pub page_size: usize,

    /// Quiet period before a typed query runs
    pub debounce_ms: u64,

    /// Threshold for switching to parallel indexing and search
    pub parallel_threshold: usize,

    /// UI label language
    pub language: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            page_size: 50,
            debounce_ms: 300,
            parallel_threshold: 10000,
            language: "en".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| MatdarError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self).map_err(|e| MatdarError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the background tasks cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            return Err(MatdarError::ConfigError {
                reason: "sync.interval_secs must be positive".to_string(),
            });
        }
        if self.sync.connectivity_interval_secs == 0 {
            return Err(MatdarError::ConfigError {
                reason: "sync.connectivity_interval_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "matdar").ok_or_else(|| MatdarError::ConfigError {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(dirs.config_dir().join("matdar.toml"))
    }

    /// Get the default data directory path.
    pub fn default_data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "matdar").ok_or_else(|| MatdarError::ConfigError {
            reason: "Could not determine data directory".to_string(),
        })?;

        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the cache directory (from config or default).
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.general.data_dir {
            Ok(path.clone())
        } else {
            Self::default_data_dir()
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn connectivity_interval(&self) -> Duration {
        Duration::from_secs(self.sync.connectivity_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.search.debounce_ms)
    }

    /// Address to probe for reachability.
    ///
    /// The explicit setting wins; otherwise the host of `remote_url` with
    /// its port or the scheme default.
    pub fn probe_address(&self) -> Option<String> {
        if let Some(address) = &self.sync.probe_address {
            return Some(address.clone());
        }
        self.sources.remote_url.as_deref().and_then(host_port)
    }
}

/// `host:port` of an http(s) URL
fn host_port(url: &str) -> Option<String> {
    let (default_port, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (443, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (80, rest)
    } else {
        return None;
    };

    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    if authority.is_empty() {
        return None;
    }

    // Bracketed IPv6 literals carry colons of their own
    let has_port = match authority.rfind(']') {
        Some(end) => authority[end..].contains(':'),
        None => authority.contains(':'),
    };
    if has_port {
        Some(authority.to_string())
    } else {
        Some(format!("{authority}:{default_port}"))
    }
}
