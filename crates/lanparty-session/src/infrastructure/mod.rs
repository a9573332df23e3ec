//! Infrastructure layer for the matchmaking node.
//!
//! Contains the OS-facing adapters: UDP discovery sockets, game-session
//! runtimes, and file-system configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lanparty_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod runtime;
pub mod storage;
