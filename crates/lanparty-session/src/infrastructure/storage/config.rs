//! TOML-based configuration for the matchmaking node.
//!
//! Reads and writes [`LanPartyConfig`] to the platform-appropriate config file
//! unless a path is given explicitly:
//! - Windows:  `%APPDATA%\LanParty\config.toml`
//! - Linux:    `~/.config/lanparty/config.toml`
//! - macOS:    `~/Library/Application Support/LanParty/config.toml`
//!
//! ```toml
//! [discovery]
//! mode = "lan"
//! port = 47777
//! timeout_ms = 1500
//! broadcast_interval_ms = 500
//! broadcast_addr = "255.255.255.255"
//! # advertise_addr = "192.168.1.20"   # default: detected local IPv4
//!
//! [session]
//! game_port = 7777
//! bind_address = "0.0.0.0"
//! capacity = 2
//! auto_start_delay_ms = 3000
//! stage = "WaitScene"
//! recheck_capacity_before_start = false
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or a
//! file written by an older release all load cleanly.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanparty_core::protocol::messages::DISCOVERY_PORT;
use lanparty_core::protocol::validation::DEFAULT_MAX_CAPACITY;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::coordinator::CoordinatorConfig;

/// Error type for configuration loading and validation.
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

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configured discovery mode has no implementation.
    #[error("discovery mode {0:?} is not supported")]
    UnsupportedMode(DiscoveryMode),

    /// A value is out of range or unparseable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LanPartyConfig {
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// How sessions are discovered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// UDP broadcast on the local subnet.
    Lan,
    /// Lobby/relay service on the internet.  Reserved; not implemented.
    RemoteLobby,
}

/// Discovery port, timing, and broadcast target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    #[serde(default = "default_mode")]
    pub mode: DiscoveryMode,
    /// UDP port hosts announce on and searchers listen on.
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// How long a search listens before giving up and hosting.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Time between two host announcements.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Destination of host announcements.
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    /// IPv4 address put into announcements.  Detected from the routing table
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_addr: Option<String>,
}

/// Game session parameters handed to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// Port the game runtime hosts on (advertised in announcements).
    #[serde(default = "default_game_port")]
    pub game_port: u16,
    /// Address the game runtime binds when hosting.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Players per room, host included.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Delay between the room filling up and the stage transition.
    #[serde(default = "default_auto_start_delay_ms")]
    pub auto_start_delay_ms: u64,
    /// Stage the runtime loads when the game starts.
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Re-check the roster at the end of the countdown and resume announcing
    /// if a peer left.
    #[serde(default)]
    pub recheck_capacity_before_start: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// `tracing` level filter: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_mode() -> DiscoveryMode {
    DiscoveryMode::Lan
}
fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_timeout_ms() -> u64 {
    1500
}
fn default_broadcast_interval_ms() -> u64 {
    500
}
fn default_broadcast_addr() -> String {
    Ipv4Addr::BROADCAST.to_string()
}
fn default_game_port() -> u16 {
    7777
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_capacity() -> u32 {
    2
}
fn default_auto_start_delay_ms() -> u64 {
    3000
}
fn default_stage() -> String {
    "WaitScene".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            port: default_discovery_port(),
            timeout_ms: default_timeout_ms(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            broadcast_addr: default_broadcast_addr(),
            advertise_addr: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            game_port: default_game_port(),
            bind_address: default_bind_address(),
            capacity: default_capacity(),
            auto_start_delay_ms: default_auto_start_delay_ms(),
            stage: default_stage(),
            recheck_capacity_before_start: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Validation and conversion ─────────────────────────────────────────────────

impl LanPartyConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML (including unknown
    /// discovery modes) and [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: LanPartyConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.capacity == 0 {
            return Err(ConfigError::Invalid("session.capacity must be at least 1".into()));
        }
        if self.session.capacity > DEFAULT_MAX_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "session.capacity must be at most {DEFAULT_MAX_CAPACITY}"
            )));
        }
        if self.discovery.port == 0 {
            return Err(ConfigError::Invalid("discovery.port must not be 0".into()));
        }
        if self.discovery.timeout_ms == 0 {
            return Err(ConfigError::Invalid("discovery.timeout_ms must be positive".into()));
        }
        if self.discovery.broadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery.broadcast_interval_ms must be positive".into(),
            ));
        }
        if self.session.game_port == 0 {
            return Err(ConfigError::Invalid("session.game_port must not be 0".into()));
        }
        self.discovery.broadcast_ipv4()?;
        self.discovery.advertise_ipv4()?;
        self.session.bind_ip()?;
        Ok(())
    }
}

impl DiscoverySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// Parses `broadcast_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IPv4 address.
    pub fn broadcast_ipv4(&self) -> Result<Ipv4Addr, ConfigError> {
        parse_ipv4("discovery.broadcast_addr", &self.broadcast_addr)
    }

    /// Parses `advertise_addr`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is set but not an IPv4 address.
    pub fn advertise_ipv4(&self) -> Result<Option<Ipv4Addr>, ConfigError> {
        self.advertise_addr
            .as_deref()
            .map(|addr| parse_ipv4("discovery.advertise_addr", addr))
            .transpose()
    }
}

fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{field} {value:?} is not an IPv4 address")))
}

impl SessionSettings {
    /// Parses `bind_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "session.bind_address {:?} is not an IP address",
                self.bind_address
            ))
        })
    }

    /// Builds the coordinator settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` does not parse.
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig, ConfigError> {
        Ok(CoordinatorConfig {
            game_port: self.game_port,
            bind_address: self.bind_ip()?,
            auto_start_delay: Duration::from_millis(self.auto_start_delay_ms),
            stage: self.stage.clone(),
            recheck_capacity_before_start: self.recheck_capacity_before_start,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] for out-of-range values.
pub fn load_config(path: &Path) -> Result<LanPartyConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => LanPartyConfig::from_toml_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LanPartyConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &LanPartyConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanParty"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanparty"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanParty")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
