//! paramcache intermediate representation: parameterized jobs, their
//! structural fingerprints, and the compiled artifacts they lower to.

pub mod artifact;
pub mod builder;
pub mod dialect;
pub mod fingerprint;
pub mod lowering;
pub mod passes;

pub use artifact::*;
pub use builder::*;
pub use dialect::*;
pub use fingerprint::*;
pub use lowering::*;
pub use passes::*;
