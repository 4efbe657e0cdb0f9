//! Reuse of compiled artifacts across parameter sweeps.
//!
//! A job is fingerprinted by its shape; the first compile of a shape is
//! stored as a template together with the slots its parameters land in.
//! Later jobs with the same fingerprint are served by rewriting those slots.

pub mod engine;
pub mod entry;
pub mod error;
pub mod locator;
pub mod persist;
pub mod stats;
pub mod store;

pub use engine::SubstitutionEngine;
pub use entry::{CacheEntry, EntrySignature, ParamSlots, SlotBinding, SlotRule};
pub use error::CacheError;
pub use locator::SlotLocator;
pub use persist::{read_mappings, EncodedStore, MappingRecord, SaveReport, FORMAT_TAG, FORMAT_VERSION};
pub use stats::CacheStats;
pub use store::MappingStore;
