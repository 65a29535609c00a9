//! TOML configuration for the client.
//!
//! Read from the platform-appropriate config file unless a path is given:
//! - Windows:  `%APPDATA%\HotWatch\config.toml`
//! - Linux:    `~/.config/hotwatch/config.toml`
//! - macOS:    `~/Library/Application Support/HotWatch/config.toml`
//!
//! ```toml
//! [session]
//! server_url = ""
//! default_host = "192.168.1.20:8080"
//! watch_dir = "/home/dev/proj"
//! source_file = "/home/dev/proj/main.qml"
//!
//! [discovery]
//! port = 45454
//! timeout_ms = 1000
//! max_attempts = 3
//!
//! [diagnostics]
//! forward = true
//! min_level = "info"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section and field is optional; a missing file yields the defaults.
//! An empty `server_url` and `default_host` means the client discovers the
//! server on the LAN.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hotwatch_core::protocol::discovery::DISCOVERY_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::application::discovery_scheduler::{
    DiscoveryConfig, DISCOVERY_TIMEOUT, MAX_DISCOVERY_ATTEMPTS,
};
use crate::application::session_manager::SessionSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A level name is not one of trace, debug, info, warn, error.
    #[error("invalid log level {0:?}")]
    InvalidLevel(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Initial session properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSection {
    /// Base URL of a known server.  Empty means unknown.
    #[serde(default)]
    pub server_url: String,
    /// Static host used when no server URL is known, e.g. `"10.0.0.5:8080"`.
    #[serde(default)]
    pub default_host: String,
    /// Local directory matching the server's path namespace root.
    #[serde(default)]
    pub watch_dir: String,
    /// Entry UI file, used to build the file URL.
    #[serde(default)]
    pub source_file: String,
}

/// Discovery tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoverySection {
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Log forwarding to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticsSection {
    /// Whether log records are forwarded while connected.
    #[serde(default = "default_true")]
    pub forward: bool,
    /// Lowest level forwarded.
    #[serde(default = "default_level")]
    pub min_level: String,
}

/// Console logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_timeout_ms() -> u64 {
    DISCOVERY_TIMEOUT.as_millis() as u64
}
fn default_max_attempts() -> u32 {
    MAX_DISCOVERY_ATTEMPTS
}
fn default_true() -> bool {
    true
}
fn default_level() -> String {
    "info".to_string()
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            forward: default_true(),
            min_level: default_level(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Initial properties for the session manager.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            server_url: self.session.server_url.clone(),
            default_host: self.session.default_host.clone(),
            watch_dir: self.session.watch_dir.clone(),
            source_file: self.session.source_file.clone(),
        }
    }

    /// Discovery tunables for the scheduler.  A zero attempt ceiling is
    /// raised to one round.
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.discovery.port,
            timeout: Duration::from_millis(self.discovery.timeout_ms),
            max_attempts: self.discovery.max_attempts.max(1),
        }
    }
}

impl DiagnosticsSection {
    /// The lowest forwarded level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLevel`] for an unknown level name.
    pub fn min_level(&self) -> Result<Level, ConfigError> {
        self.min_level
            .parse()
            .map_err(|_| ConfigError::InvalidLevel(self.min_level.clone()))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolves the platform config base directory including the `HotWatch`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("HotWatch"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hotwatch"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("HotWatch")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
