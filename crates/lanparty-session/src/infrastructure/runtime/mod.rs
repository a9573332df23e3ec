//! Game-session runtimes.
//!
//! - [`TcpSessionRuntime`]: hosts or joins over TCP; used by the binary.
//! - [`MockSessionRuntime`]: in-memory roster driven by tests.

pub mod mock;
pub mod tcp;

pub use mock::MockSessionRuntime;
pub use tcp::TcpSessionRuntime;
