//! The game-session runtime the coordinator drives.
//!
//! The coordinator never touches game traffic.  It asks the runtime to host or
//! join, watches the peer roster through [`PeerEvent`]s, and finally asks it to
//! load the first stage.  `infrastructure::runtime` provides a TCP-backed
//! implementation and a scripted one for tests.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Runtime-assigned identifier of a connected remote peer.
pub type PeerId = u64;

/// Roster change reported by the runtime.
///
/// A host receives one `Connected` per joining client.  A client receives a
/// single `Connected` once its connection to the host is established, and
/// `Disconnected` when the host goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

/// Error type for runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The host listener could not be opened.
    #[error("failed to host on {addr}: {source}")]
    HostStart {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The connection to a host could not be established.
    #[error("failed to join {addr}: {reason}")]
    ClientStart { addr: SocketAddr, reason: String },

    /// The operation needs a hosted session.
    #[error("no session is being hosted")]
    NotHosting,

    /// The runtime rejected the stage change.
    #[error("failed to load stage {stage:?}: {reason}")]
    Stage { stage: String, reason: String },
}

/// A networked game session that can be hosted or joined.
#[async_trait]
pub trait NetworkSessionRuntime: Send + Sync {
    /// Starts hosting on `bind:port`.  Any previous session is shut down first.
    async fn start_host(&self, bind: IpAddr, port: u16) -> Result<(), RuntimeError>;

    /// Connects to the host at `addr`.  Any previous session is shut down
    /// first.  Returning `Ok` means the connection attempt was started; the
    /// `Connected` event confirms it.
    async fn start_client(&self, addr: SocketAddr) -> Result<(), RuntimeError>;

    /// Closes the current session, host or client.  A no-op when offline.
    async fn shutdown(&self);

    /// Number of peers in the session, the local one included.  Zero when
    /// offline.
    fn connected_peers(&self) -> usize;

    /// Returns `true` while hosting.
    fn is_host(&self) -> bool;

    /// Subscribes to roster changes.  Events emitted before the call are not
    /// replayed.
    fn subscribe(&self) -> broadcast::Receiver<PeerEvent>;

    /// Moves every peer of a hosted session to `stage`.
    async fn load_stage(&self, stage: &str) -> Result<(), RuntimeError>;
}
