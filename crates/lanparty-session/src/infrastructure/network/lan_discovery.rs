//! UDP broadcast session discovery.
//!
//! A host announces its session by broadcasting one JSON datagram per interval
//! to the discovery port.  A searcher binds that port, listens until an
//! announcement passes validation or the search window closes, and hands the
//! announcement back to the coordinator.
//!
//! # Socket lifetime
//!
//! The discovery port is exclusive: only one searcher per host can bind it.
//! Both operations own their socket as a local value, so it is closed on every
//! exit path (found, timed out, cancelled, failed) before the call returns.
//!
//! # Search window
//!
//! The deadline is fixed when the search starts.  Foreign or malformed traffic
//! on the port is discarded without extending it.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use lanparty_core::protocol::messages::DISCOVERY_PORT;
use lanparty_core::protocol::{
    decode, serialize, Announcement, DiscoveryMessage, ProtocolError, ValidationError,
    ValidationRules,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::discovery::DiscoverySystem;

/// Receive buffer size.  Announcements are a few hundred bytes.
const MAX_DATAGRAM: usize = 2048;

/// Error type for LAN discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A socket option or send/receive call failed.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// A datagram was not a discovery message.
    #[error(transparent)]
    Decode(#[from] ProtocolError),

    /// A discovery message failed validation.
    #[error(transparent)]
    Rejected(#[from] ValidationError),
}

/// Settings for [`LanBroadcastDiscovery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanDiscoveryConfig {
    /// UDP port hosts announce on and searchers bind.
    pub port: u16,
    /// Length of one search window.
    pub timeout: Duration,
    /// Time between two announcements.
    pub broadcast_interval: Duration,
    /// Destination of announcements.  The limited broadcast address by
    /// default; a unicast or loopback address also works.
    pub broadcast_addr: Ipv4Addr,
    /// Address put into announcements.  Detected when `None`.
    pub advertise_addr: Option<Ipv4Addr>,
    /// Acceptance rules for received announcements.
    pub rules: ValidationRules,
}

impl Default for LanDiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            timeout: Duration::from_millis(1500),
            broadcast_interval: Duration::from_millis(500),
            broadcast_addr: Ipv4Addr::BROADCAST,
            advertise_addr: None,
            rules: ValidationRules::default(),
        }
    }
}

/// [`DiscoverySystem`] over UDP broadcast on the local subnet.
#[derive(Debug, Clone)]
pub struct LanBroadcastDiscovery {
    config: LanDiscoveryConfig,
}

impl LanBroadcastDiscovery {
    pub fn new(config: LanDiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LanDiscoveryConfig {
        &self.config
    }

    /// Builds the announcement for a session on `game_port`.
    ///
    /// Each call mints a fresh `host_id`; one hosted session uses one
    /// announcement for its whole lifetime.
    pub fn announcement(&self, game_port: u16, capacity: u32) -> DiscoveryMessage {
        let ip = self.config.advertise_addr.unwrap_or_else(local_ipv4_or_loopback);
        DiscoveryMessage::ok(Announcement {
            host_id: Some(uuid::Uuid::new_v4().to_string()),
            build_id: Some(env!("CARGO_PKG_VERSION").to_string()),
            ..Announcement::lan(ip.to_string(), game_port, capacity)
        })
    }

    async fn bind_listener(&self) -> Result<UdpSocket, DiscoveryError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.port);
        UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })
    }

    /// Decodes and validates one datagram.
    fn accept(&self, datagram: &[u8]) -> Result<DiscoveryMessage, DiscoveryError> {
        let msg = decode(datagram)?;
        msg.check(&self.config.rules)?;
        Ok(msg)
    }
}

#[async_trait]
impl DiscoverySystem for LanBroadcastDiscovery {
    async fn find_session(&self, cancel: CancellationToken) -> DiscoveryMessage {
        let socket = match self.bind_listener().await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("{e}");
                return DiscoveryMessage::fail(e.to_string());
            }
        };
        debug!(
            "searching on UDP {} for {:?}",
            self.config.port, self.config.timeout
        );

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("search cancelled");
                    return DiscoveryMessage::canceled();
                }
                _ = &mut deadline => {
                    debug!("search window closed");
                    return DiscoveryMessage::not_found(None);
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => match self.accept(&buf[..len]) {
                        Ok(msg) => {
                            info!(
                                "found session {}:{} (capacity {}) announced by {src}",
                                msg.ip().unwrap_or_default(),
                                msg.port().unwrap_or_default(),
                                msg.capacity().unwrap_or_default()
                            );
                            return msg;
                        }
                        Err(reason) => debug!("ignoring datagram from {src}: {reason}"),
                    },
                    Err(e) if is_transient_error(&e) => continue,
                    Err(e) => {
                        warn!("discovery receive failed: {e}");
                        return DiscoveryMessage::fail(DiscoveryError::Socket(e).to_string());
                    }
                },
            }
        }
    }

    async fn start_session(&self, game_port: u16, capacity: u32, cancel: CancellationToken) {
        let socket = match create_broadcast_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                error!("cannot announce session: {e}");
                return;
            }
        };
        let payload = match serialize(&self.announcement(game_port, capacity)) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("cannot encode announcement: {e}");
                return;
            }
        };

        let target = SocketAddr::new(IpAddr::V4(self.config.broadcast_addr), self.config.port);
        info!(
            "announcing game port {game_port} to {target} every {:?}",
            self.config.broadcast_interval
        );
        let sink = UdpAnnouncer { socket, target };
        let sent = announce_loop(&sink, &payload, self.config.broadcast_interval, &cancel).await;
        info!("stopped announcing after {sent} datagram(s)");
    }
}

// ── Announcement loop ─────────────────────────────────────────────────────────

/// Destination of announcement datagrams.
#[async_trait]
trait AnnounceSink: Send + Sync {
    async fn send(&self, payload: &[u8]) -> io::Result<()>;
}

struct UdpAnnouncer {
    socket: UdpSocket,
    target: SocketAddr,
}

#[async_trait]
impl AnnounceSink for UdpAnnouncer {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.target).await.map(|_| ())
    }
}

/// Sends `payload` once per `every` until `cancel` fires, starting
/// immediately.  Returns the number of successful sends.
async fn announce_loop(
    sink: &dyn AnnounceSink,
    payload: &[u8],
    every: Duration,
    cancel: &CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match sink.send(payload).await {
            Ok(()) => sent += 1,
            Err(e) => warn!("announcement send failed: {e}"),
        }
    }
    sent
}

async fn create_broadcast_socket() -> Result<UdpSocket, DiscoveryError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Best-effort primary IPv4 address of this machine, or `127.0.0.1`.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface, whose address is then read back.
pub fn local_ipv4_or_loopback() -> Ipv4Addr {
    probe_local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST)
}

fn probe_local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Returns `true` for receive errors that do not invalidate the socket.
///
/// Windows reports an ICMP port-unreachable for an earlier send as
/// `ConnectionReset` on the next receive.
fn is_transient_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
