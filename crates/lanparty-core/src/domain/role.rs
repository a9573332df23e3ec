//! Session roles: the states one matchmaking attempt moves through.
//!
//! ```text
//! Idle ──► Searching ──► Client
//!              │
//!              └──► BecomingHost ──► Hosting(Broadcasting)
//!                                        │
//!                                        ▼
//!                                 Hosting(WaitingForPeers)
//!                                        │  roster reaches capacity
//!                                        ▼
//!                                 Hosting(RoomFull)
//!                                        │  broadcast stopped
//!                                        ▼
//!                                 Hosting(CountdownToStart)
//!                                        │  delay elapsed
//!                                        ▼
//!                                 Hosting(HandoffToRuntime)
//! ```
//!
//! Cancelling from any active state returns to `Idle`.  `Client` and
//! `Hosting(HandoffToRuntime)` end an attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sub-phase of the host role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostPhase {
    /// Hosting started; the announcement task is being launched.
    Broadcasting,
    /// Announcing and watching the peer roster.
    WaitingForPeers,
    /// The roster reached capacity; announcing is being stopped.
    RoomFull,
    /// Waiting out the start delay.
    CountdownToStart,
    /// The runtime was asked to move to the next stage.
    HandoffToRuntime,
}

/// Role of the local peer within one matchmaking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionRole {
    #[default]
    Idle,
    Searching,
    Client,
    BecomingHost,
    Hosting(HostPhase),
}

impl SessionRole {
    /// Returns `true` while an attempt is in progress or holds a connection.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionRole::Idle)
    }

    /// Returns `true` for any host sub-phase.
    pub fn is_host(self) -> bool {
        matches!(self, SessionRole::Hosting(_))
    }

    /// Returns `true` for the two states that end an attempt.
    ///
    /// A finished attempt keeps its role rather than returning to `Idle`; the
    /// coordinator starts a new attempt from either one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionRole::Client | SessionRole::Hosting(HostPhase::HandoffToRuntime)
        )
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Idle => f.write_str("idle"),
            SessionRole::Searching => f.write_str("searching"),
            SessionRole::Client => f.write_str("client"),
            SessionRole::BecomingHost => f.write_str("becoming-host"),
            SessionRole::Hosting(phase) => {
                let phase = match phase {
                    HostPhase::Broadcasting => "broadcasting",
                    HostPhase::WaitingForPeers => "waiting-for-peers",
                    HostPhase::RoomFull => "room-full",
                    HostPhase::CountdownToStart => "countdown",
                    HostPhase::HandoffToRuntime => "handoff",
                };
                write!(f, "hosting/{phase}")
            }
        }
    }
}
