//! lanparty-session library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does lanparty-session do?
//!
//! Two peers on one subnet press "play".  Each first listens on the discovery
//! port for a host announcement.  The peer that hears one joins it as a client;
//! the peer that hears nothing within the timeout becomes the host, announces
//! itself every broadcast interval, and starts the game once the roster is
//! full.
//!
//! 1. `application::coordinator` owns that role election and its cancellation.
//! 2. `application::discovery` and `application::runtime` are the two seams the
//!    coordinator depends on: finding/announcing sessions and running the
//!    actual game connection.
//! 3. `infrastructure` provides the LAN broadcast discovery, a TCP session
//!    runtime, an in-memory runtime for tests, and TOML configuration.

/// Application layer: the coordinator and the traits it depends on.
pub mod application;

/// Infrastructure layer: sockets, runtimes, and configuration storage.
pub mod infrastructure;
