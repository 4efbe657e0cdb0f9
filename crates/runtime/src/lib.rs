//! Session-level wiring: options, backend dispatch and the CLI.

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod options;
pub mod session;

pub use backend::{Backend, ChecksumBackend, ExecutionResult};
pub use options::CacheOptions;
pub use session::CacheSession;
