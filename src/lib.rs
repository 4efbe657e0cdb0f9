//! paramcache facade: re-exports the workspace crates under one roof.

pub use paramcache_cache as cache;
pub use paramcache_compiler as compiler;
pub use paramcache_ir as ir;
pub use paramcache_runtime as runtime;
