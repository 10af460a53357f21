//! Configuration Management
//!
//! Named connections and console settings.
//!
//! # Configuration Locations
//! - Local: `.dbconsole/config.json` in the working directory
//! - Global: `<config_dir>/dbconsole/config.json` (per-user, via `dirs`)
//!
//! # Resolution Precedence
//! 1. Explicit connection parameters (highest priority)
//! 2. Local config file
//! 3. Global config file
//!
//! Local connections replace global ones with the same name; a local `default` or
//! setting replaces the global one.
//!
//! # File Format
//! ```json
//! {
//!   "connections": {
//!     "app": { "engine": "postgres", "host": "localhost", "port": 5432,
//!              "user": "app", "database": "app", "password_env": "APP_DB_PASSWORD" },
//!     "cache": { "engine": "redis", "host": "localhost", "port": 6379 }
//!   },
//!   "default": "app",
//!   "settings": { "timeout_ms": 30000 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::descriptor::ConnectionConfig;
use crate::engine::{EngineSettings, DEFAULT_SAMPLE_LIMIT, DEFAULT_SCAN_LIMIT};
use crate::error::{ConsoleError, Result};
use crate::session::{SessionSettings, DEFAULT_TIMEOUT};

const CONFIG_DIR: &str = ".dbconsole";
const CONFIG_FILE: &str = "config.json";

/// Contents of one config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Named connections
    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,

    /// Name of the connection used when none is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "SettingsFile::is_empty")]
    pub settings: SettingsFile,
}

/// Settings as written in a config file; absent values fall back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_limit: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_limit: Option<usize>,
}

impl SettingsFile {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `other`'s values where set, else ours
    #[must_use]
    pub fn overridden_by(self, other: Self) -> Self {
        Self {
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
            sample_limit: other.sample_limit.or(self.sample_limit),
            scan_limit: other.scan_limit.or(self.scan_limit),
        }
    }

    /// Session settings with defaults filled in
    #[must_use]
    pub fn session(&self) -> SessionSettings {
        SessionSettings { timeout: self.timeout_ms.map_or(DEFAULT_TIMEOUT, Duration::from_millis) }
    }

    /// Engine settings with defaults filled in
    #[must_use]
    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            sample_limit: self.sample_limit.unwrap_or(DEFAULT_SAMPLE_LIMIT),
            scan_limit: self.scan_limit.unwrap_or(DEFAULT_SCAN_LIMIT),
        }
    }
}

/// Stored connection configuration
///
/// Like `ConnectionConfig`, but the password may come from an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl StoredConnection {
    /// Stored connection with no password indirection
    pub const fn new(config: ConnectionConfig) -> Self {
        Self { config, password_env: None }
    }

    /// Connection config with `password_env` resolved
    ///
    /// # Errors
    /// `ConfigError` when the named variable is not set.
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            let password = std::env::var(env_var).map_err(|_| {
                ConsoleError::config_error(format!(
                    "Environment variable {env_var} not found for password"
                ))
            })?;
            config.password = Some(password);
        }

        Ok(config)
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// `.dbconsole/config.json` in the working directory
    Local,
    /// `<config_dir>/dbconsole/config.json`
    Global,
}

impl ConfigLocation {
    /// File path for this location
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Path of the project-local config file
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ConsoleError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Path of the per-user config file
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConsoleError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("dbconsole").join(CONFIG_FILE))
}

/// Load a config file; a missing file is an empty config
pub fn load_config(path: &Path) -> Result<ConsoleConfig> {
    if !path.exists() {
        return Ok(ConsoleConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        ConsoleError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map_err(|e| {
        ConsoleError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })
}

/// Write a config file, creating its directory
pub fn save_config(path: &Path, config: &ConsoleConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ConsoleError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| ConsoleError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| ConsoleError::config_error(format!("Could not write config file: {e}")))
}

/// Layer `local` over `global`
#[must_use]
pub fn merge(global: ConsoleConfig, local: ConsoleConfig) -> ConsoleConfig {
    let mut merged = global;
    merged.connections.extend(local.connections);
    if local.default.is_some() {
        merged.default = local.default;
    }
    merged.settings = merged.settings.overridden_by(local.settings);
    merged
}

/// Merged view of the global and local config files
pub fn load_with_precedence() -> Result<ConsoleConfig> {
    let global = load_config(&global_config_path()?)?;
    let local = load_config(&local_config_path()?)?;
    Ok(merge(global, local))
}

impl ConsoleConfig {
    /// Resolve a connection by name, or the default when `name` is `None`
    ///
    /// # Errors
    /// `ConfigError` when no such connection exists, no default is set, or its
    /// password variable is missing.
    pub fn resolve_connection(&self, name: Option<&str>) -> Result<ConnectionConfig> {
        let conn_name = match name {
            Some(n) => n,
            None => self.default.as_deref().ok_or_else(|| {
                ConsoleError::config_error(format!(
                    "No default connection set. Available connections: {:?}. \
                     Specify one with --name or run 'dbconsole connect'.",
                    self.connections.keys().collect::<Vec<_>>()
                ))
            })?,
        };

        let stored = self.connections.get(conn_name).ok_or_else(|| {
            ConsoleError::config_error(format!(
                "Connection '{conn_name}' not found. Available connections: {:?}",
                self.connections.keys().collect::<Vec<_>>()
            ))
        })?;

        stored.resolve()
    }

    /// Add or replace a named connection; the first one becomes the default
    pub fn upsert(&mut self, name: impl Into<String>, stored: StoredConnection) {
        let name = name.into();
        if self.connections.is_empty() && self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.connections.insert(name, stored);
    }

    /// Connections that resolve, skipping ones with missing password variables
    #[must_use]
    pub fn resolved_connections(&self) -> Vec<(String, ConnectionConfig)> {
        self.connections
            .iter()
            .filter_map(|(name, stored)| match stored.resolve() {
                Ok(config) => Some((name.clone(), config)),
                Err(_) => {
                    // Error detail omitted to keep credentials out of logs
                    warn!(connection = %name, "could not resolve stored connection");
                    None
                }
            })
            .collect()
    }
}

/// Save a connection into the config file at `location`
pub fn save_connection(
    name: &str,
    stored: StoredConnection,
    location: ConfigLocation,
) -> Result<PathBuf> {
    let path = location.path()?;
    let mut config = load_config(&path)?;
    config.upsert(name, stored);
    save_config(&path, &config)?;
    debug!(connection = name, path = %path.display(), "saved connection");
    Ok(path)
}
