//! Domain entities for LAN Party matchmaking.
//!
//! Pure types with no infrastructure dependencies.  The coordinator in
//! `lanparty-session` drives these states; UIs and tests observe them.

/// Session roles and host sub-phases.
///
/// See [`role::SessionRole`] for the main type.
pub mod role;
