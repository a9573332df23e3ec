//! # lanparty-core
//!
//! Shared library for LAN Party matchmaking containing the discovery wire
//! protocol and the session-role domain model.
//!
//! This crate has zero dependencies on sockets, async runtimes, or the game
//! session runtime.  Both the host and the searching peer use it.
//!
//! # Architecture overview
//!
//! Two peers on the same subnet elect a host without any central server: one
//! peer scans the discovery port for announcements, and if nothing arrives in
//! time it becomes the host and starts announcing itself.
//!
//! - **`protocol`** – The [`DiscoveryMessage`] that travels in each UDP
//!   datagram, its JSON codec, and the validation rules a receiver applies
//!   before trusting an announcement.
//!
//! - **`domain`** – The [`SessionRole`] state machine vocabulary shared by the
//!   coordinator and its observers.

pub mod domain;
pub mod protocol;

pub use domain::role::{HostPhase, SessionRole};
pub use protocol::codec::{decode, serialize, try_deserialize, ProtocolError};
pub use protocol::messages::{DiscoveryMessage, DiscoveryStatus};
pub use protocol::validation::{ValidationError, ValidationRules};
