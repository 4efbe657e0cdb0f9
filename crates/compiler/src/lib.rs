//! paramcache compiler facade: the compile callback trait, its execution
//! configuration, and the reference basis compiler.

pub mod pipeline;

pub use pipeline::*;
