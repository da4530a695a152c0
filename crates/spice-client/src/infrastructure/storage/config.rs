//! TOML-based configuration for the playback client.
//!
//! The default location is platform-specific:
//! - Windows:  `%APPDATA%\SpicePlayback\config.toml`
//! - Linux:    `~/.config/spice-playback/config.toml`
//! - macOS:    `~/Library/Application Support/SpicePlayback/config.toml`
//!
//! An explicit path given on the command line takes precedence.
//!
//! ```toml
//! [client]
//! log_level = "debug"
//!
//! [connection]
//! host = "spice.example.net"
//! port = 5900
//! tls_port = 5901
//! ca_file = "/etc/pki/spice/ca-cert.pem"
//!
//! [auth]
//! password = "s3cret"
//!
//! [playback]
//! pcm_output = "playback.pcm"
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = ...)]` so a partial file, or no file
//! at all, still yields a usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to locate, read, or write the playback client's config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `APPDATA`, `XDG_CONFIG_HOME` nor `HOME` is usable.
    #[error("no config directory for this platform; pass --config")]
    NoPlatformConfigDir,

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid playback config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode playback config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Sections ──────────────────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// General client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where and how to reach the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Plain TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS port.  When set, the channel connects here over TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_port: Option<u16>,
    /// PEM file with the CA certificates trusted for TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Name checked against the server certificate.  Defaults to `host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Session id assigned by the main channel; 0 for a fresh session.
    #[serde(default)]
    pub connection_id: u32,
    #[serde(default)]
    pub channel_id: u8,
}

/// Credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Ticket password.  Empty when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Audio output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    /// File receiving interleaved PCM samples.
    #[serde(default = "default_pcm_output")]
    pub pcm_output: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5900
}
fn default_pcm_output() -> PathBuf {
    PathBuf::from("playback.pcm")
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_port: None,
            ca_file: None,
            server_name: None,
            connection_id: 0,
            channel_id: 0,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pcm_output: default_pcm_output(),
        }
    }
}

impl ConnectionConfig {
    /// `true` when the connection should use TLS.
    pub fn uses_tls(&self) -> bool {
        self.tls_port.is_some()
    }

    /// `host:port` of the port selected for this connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.tls_port.unwrap_or(self.port))
    }

    /// Certificate name to verify.
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }
}

// ── Loading and saving ────────────────────────────────────────────────────────

/// `config.toml` inside the platform config directory.
///
/// # Errors
///
/// [`ConfigError::NoPlatformConfigDir`] on platforms without one.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from the default location.  See [`load_config_from`].
///
/// # Errors
///
/// As for [`load_config_from`], plus [`ConfigError::NoPlatformConfigDir`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Reads `path`.  A missing file is not an error: it yields the defaults.
///
/// # Errors
///
/// [`ConfigError::Io`] when the file exists but cannot be read;
/// [`ConfigError::Parse`] for malformed TOML.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating missing directories.
///
/// # Errors
///
/// [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SpicePlayback"))
    }

    #[cfg(target_os = "linux")]
    {
        let xdg = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
        let home = || std::env::var_os("HOME").map(|home| Path::new(&home).join(".config"));
        xdg.or_else(home).map(|dir| dir.join("spice-playback"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("SpicePlayback")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
