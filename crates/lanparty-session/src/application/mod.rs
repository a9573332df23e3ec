//! Application layer use cases for matchmaking.
//!
//! Code in this layer depends only on traits and `lanparty_core` types; sockets
//! and game connections are injected from the infrastructure layer at
//! construction time, which keeps the coordinator unit-testable.
//!
//! # Sub-modules
//!
//! - **`discovery`**   – The [`discovery::DiscoverySystem`] capability: search
//!   for a session or announce one.
//!
//! - **`runtime`**     – The [`runtime::NetworkSessionRuntime`] capability: the
//!   game connection layer that hosts, joins, counts peers, and changes stage.
//!
//! - **`coordinator`** – The [`coordinator::SessionCoordinator`] role-election
//!   state machine.

pub mod coordinator;
pub mod discovery;
pub mod runtime;
