//! Network infrastructure for session discovery.
//!
//! - **`lan_discovery`**: UDP broadcast search and announcement.
//!
//! [`create_discovery`] picks the implementation for the configured mode.
//! Modes without an implementation fail here, at start-up, rather than on
//! the first search.

pub mod lan_discovery;

use std::sync::Arc;

use crate::application::discovery::DiscoverySystem;
use crate::infrastructure::storage::config::{ConfigError, DiscoveryMode, DiscoverySettings};

pub use lan_discovery::{LanBroadcastDiscovery, LanDiscoveryConfig};

impl LanDiscoveryConfig {
    /// Builds the LAN settings from the `[discovery]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparseable addresses.
    pub fn from_settings(settings: &DiscoverySettings) -> Result<Self, ConfigError> {
        Ok(Self {
            port: settings.port,
            timeout: settings.timeout(),
            broadcast_interval: settings.broadcast_interval(),
            broadcast_addr: settings.broadcast_ipv4()?,
            advertise_addr: settings.advertise_ipv4()?,
            ..Self::default()
        })
    }
}

/// Creates the discovery system for `settings.mode`.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedMode`] for
/// [`DiscoveryMode::RemoteLobby`], and [`ConfigError::Invalid`] for bad LAN
/// settings.
pub fn create_discovery(settings: &DiscoverySettings) -> Result<Arc<dyn DiscoverySystem>, ConfigError> {
    match settings.mode {
        DiscoveryMode::Lan => Ok(Arc::new(LanBroadcastDiscovery::new(
            LanDiscoveryConfig::from_settings(settings)?,
        ))),
        DiscoveryMode::RemoteLobby => Err(ConfigError::UnsupportedMode(settings.mode)),
    }
}
