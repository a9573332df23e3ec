//! The discovery message carried by every LAN announcement datagram.
//!
//! One message travels per UDP datagram.  The JSON field names are fixed:
//! `tag, proto_version, source, status, ip, port, capacity, error, host_id,
//! build_id, meta`.  Peers built from older releases emit every field (using
//! `null` for absent values), so all of them except `status` are optional on
//! the way in.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Game/schema identifier; announcements with any other tag are ignored.
pub const GAME_TAG: &str = "BGame";

/// Current discovery schema version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Source label used by LAN broadcast announcements.
pub const LAN_SOURCE: &str = "lan";

/// Well-known UDP port on which hosts announce and searchers listen.
pub const DISCOVERY_PORT: u16 = 47777;

/// Meta label attached to announcements by default.
pub const DEFAULT_META: &str = "Prototype";

// ── Status ────────────────────────────────────────────────────────────────────

/// Outcome carried by a [`DiscoveryMessage`].
///
/// Encoded on the wire as its ordinal (`Success = 0` … `Error = 3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum DiscoveryStatus {
    Success = 0,
    NotFound = 1,
    Canceled = 2,
    Error = 3,
}

impl From<DiscoveryStatus> for u8 {
    fn from(status: DiscoveryStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for DiscoveryStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(DiscoveryStatus::Success),
            1 => Ok(DiscoveryStatus::NotFound),
            2 => Ok(DiscoveryStatus::Canceled),
            3 => Ok(DiscoveryStatus::Error),
            other => Err(format!("unknown discovery status {other}")),
        }
    }
}

impl std::fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DiscoveryStatus::Success => "success",
            DiscoveryStatus::NotFound => "not-found",
            DiscoveryStatus::Canceled => "canceled",
            DiscoveryStatus::Error => "error",
        };
        f.write_str(name)
    }
}

// ── Announcement input ────────────────────────────────────────────────────────

/// Everything a host puts into a successful announcement.
///
/// Passed to [`DiscoveryMessage::ok`].  [`Announcement::lan`] fills in the tag,
/// version, source and meta used by LAN broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub tag: String,
    pub proto_version: u32,
    pub source: String,
    pub ip: String,
    pub port: u16,
    pub capacity: u32,
    pub host_id: Option<String>,
    pub build_id: Option<String>,
    pub meta: Option<String>,
}

impl Announcement {
    /// A LAN announcement for the game session listening on `ip:port`.
    pub fn lan(ip: impl Into<String>, port: u16, capacity: u32) -> Self {
        Self {
            tag: GAME_TAG.to_string(),
            proto_version: PROTOCOL_VERSION,
            source: LAN_SOURCE.to_string(),
            ip: ip.into(),
            port,
            capacity,
            host_id: None,
            build_id: None,
            meta: Some(DEFAULT_META.to_string()),
        }
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// A discovery outcome or host announcement.
///
/// Values are immutable: build one with [`ok`](Self::ok),
/// [`not_found`](Self::not_found), [`canceled`](Self::canceled) or
/// [`fail`](Self::fail), or decode one with
/// [`try_deserialize`](crate::protocol::codec::try_deserialize).  Only the
/// success constructor populates `ip`, `port` and `capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    tag: Option<String>,
    #[serde(default)]
    proto_version: u32,
    source: Option<String>,
    status: DiscoveryStatus,
    ip: Option<String>,
    port: Option<u16>,
    capacity: Option<u32>,
    error: Option<String>,
    host_id: Option<String>,
    build_id: Option<String>,
    meta: Option<String>,
}

impl DiscoveryMessage {
    /// A successful announcement of a joinable session.
    pub fn ok(announcement: Announcement) -> Self {
        Self {
            tag: Some(announcement.tag),
            proto_version: announcement.proto_version,
            source: Some(announcement.source),
            status: DiscoveryStatus::Success,
            ip: Some(announcement.ip),
            port: Some(announcement.port),
            capacity: Some(announcement.capacity),
            error: None,
            host_id: announcement.host_id,
            build_id: announcement.build_id,
            meta: announcement.meta,
        }
    }

    /// No session was found before the search window closed.
    pub fn not_found(meta: Option<String>) -> Self {
        Self {
            meta,
            ..Self::bare(DiscoveryStatus::NotFound)
        }
    }

    /// The search was cancelled by its caller.
    pub fn canceled() -> Self {
        Self::bare(DiscoveryStatus::Canceled)
    }

    /// The search failed at the socket level.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(DiscoveryStatus::Error)
        }
    }

    fn bare(status: DiscoveryStatus) -> Self {
        Self {
            tag: None,
            proto_version: 0,
            source: None,
            status,
            ip: None,
            port: None,
            capacity: None,
            error: None,
            host_id: None,
            build_id: None,
            meta: None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn proto_version(&self) -> u32 {
        self.proto_version
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn status(&self) -> DiscoveryStatus {
        self.status
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn capacity(&self) -> Option<u32> {
        self.capacity
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub fn build_id(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    pub fn meta(&self) -> Option<&str> {
        self.meta.as_deref()
    }

    /// Returns `true` when the status is [`DiscoveryStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == DiscoveryStatus::Success
    }

    /// The announced game endpoint, if this is a success message whose `ip`
    /// parses as an IP address.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        if !self.is_success() {
            return None;
        }
        let ip: IpAddr = self.ip.as_deref()?.trim().parse().ok()?;
        Some(SocketAddr::new(ip, self.port?))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
