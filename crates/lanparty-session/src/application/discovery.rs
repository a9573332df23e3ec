//! The discovery capability the coordinator searches and announces through.
//!
//! Implementations live in `infrastructure::network`.  The trait is the seam
//! that lets the coordinator run against a scripted discovery in tests and,
//! later, against a lobby service instead of LAN broadcast.

use async_trait::async_trait;
use lanparty_core::protocol::DiscoveryMessage;
use tokio_util::sync::CancellationToken;

/// Finds joinable sessions and announces the local one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoverySystem: Send + Sync {
    /// Listens for one acceptable announcement.
    ///
    /// Resolves exactly once with one of:
    /// - `Success` carrying the first announcement that passed validation,
    /// - `NotFound` when the search window closed without one,
    /// - `Canceled` when `cancel` fired first,
    /// - `Error` when the listening socket could not be opened or failed.
    ///
    /// Any socket opened for the search is closed before this returns.
    async fn find_session(&self, cancel: CancellationToken) -> DiscoveryMessage;

    /// Announces a session on `game_port` for `capacity` players until
    /// `cancel` fires.
    ///
    /// Returns once announcing has stopped and its socket is closed.  Failures
    /// to open the socket are logged and end the task early; individual send
    /// failures are logged and skipped.
    async fn start_session(&self, game_port: u16, capacity: u32, cancel: CancellationToken);
}
