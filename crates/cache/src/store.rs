//! Fingerprint-keyed table of cache entries with lookup statistics.

use crate::entry::CacheEntry;
use crate::stats::CacheStats;
use indexmap::IndexMap;
use paramcache_ir::fingerprint::Fingerprint;

/// Entries keep insertion order so that saving the same session twice
/// produces the same bytes.
#[derive(Debug, Default, Clone)]
pub struct MappingStore {
    entries: IndexMap<Fingerprint, CacheEntry>,
    lookups: u64,
    misses: u64,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counted probe: every call is a lookup, and a lookup that finds nothing
    /// is a miss.
    pub fn lookup(&mut self, fingerprint: &Fingerprint) -> Option<&CacheEntry> {
        self.lookups += 1;
        let entry = self.entries.get(fingerprint);
        if entry.is_none() {
            self.misses += 1;
        }
        entry
    }

    /// Uncounted read for diagnostics and persistence.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<&CacheEntry> {
        self.entries.get(fingerprint)
    }

    /// Count a miss for an entry that was found but could not be reused.
    pub fn record_invalid(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_hit(&mut self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.record_hit();
        }
    }

    /// Insert or replace the entry for `fingerprint`. A replaced entry keeps
    /// its original position.
    pub fn insert(&mut self, fingerprint: Fingerprint, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(fingerprint, entry)
    }

    /// Drop every entry. Counters describe the session and are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn lookups(&self) -> u64 {
        self.lookups
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hits(&self) -> u64 {
        self.lookups.saturating_sub(self.misses)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.entries.keys()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups,
            hits: self.hits(),
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    /// Same fingerprints, in the same order, mapped to equal entries.
    /// Counters and per-entry hit counts are ignored.
    pub fn same_entries(&self, other: &MappingStore) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((fa, ea), (fb, eb))| fa == fb && ea == eb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntrySignature, ParamSlots};
    use paramcache_compiler::CompileConfig;
    use paramcache_ir::artifact::CompiledArtifact;
    use paramcache_ir::builder::JobBuilder;
    use paramcache_ir::fingerprint::JobShape;

    fn entry_for(job: &paramcache_ir::dialect::JobDescription) -> (Fingerprint, CacheEntry) {
        let shape = JobShape::of(job);
        let slots = job
            .parameters()
            .into_iter()
            .map(|base| ParamSlots::Untraceable { base })
            .collect();
        let entry = CacheEntry::new(
            CompiledArtifact::new(job.name.clone(), job.num_resources),
            slots,
            EntrySignature::new(shape.clone(), CompileConfig::default(), 0),
        );
        (shape.fingerprint(), entry)
    }

    #[test]
    fn fresh_store_has_no_misses() {
        let store = MappingStore::new();
        assert_eq!(store.stats(), CacheStats::default());
    }

    #[test]
    fn lookups_count_and_absent_lookups_miss() {
        let mut store = MappingStore::new();
        let job = JobBuilder::new("a", 1).rz(0.1, 0).build();
        let (fp, entry) = entry_for(&job);

        assert!(store.lookup(&fp).is_none());
        store.insert(fp.clone(), entry);
        assert!(store.lookup(&fp).is_some());
        assert_eq!((store.lookups(), store.misses(), store.hits()), (2, 1, 1));
    }

    #[test]
    fn invalid_entries_count_as_misses() {
        let mut store = MappingStore::new();
        let job = JobBuilder::new("a", 1).rz(0.1, 0).build();
        let (fp, entry) = entry_for(&job);
        store.insert(fp.clone(), entry);
        assert!(store.lookup(&fp).is_some());
        store.record_invalid();
        assert_eq!(store.misses(), 1);
        assert_eq!(store.hits(), 0);
    }

    #[test]
    fn replacing_keeps_insertion_order() {
        let mut store = MappingStore::new();
        let (fa, ea) = entry_for(&JobBuilder::new("a", 1).rz(0.1, 0).build());
        let (fb, eb) = entry_for(&JobBuilder::new("b", 1).ry(0.1, 0).build());
        store.insert(fa.clone(), ea.clone());
        store.insert(fb.clone(), eb);
        assert!(store.insert(fa.clone(), ea).is_some());
        let order: Vec<_> = store.fingerprints().cloned().collect();
        assert_eq!(order, vec![fa, fb]);
    }

    #[test]
    fn clear_drops_entries_but_keeps_counters() {
        let mut store = MappingStore::new();
        let (fp, entry) = entry_for(&JobBuilder::new("a", 1).rz(0.1, 0).build());
        store.insert(fp.clone(), entry);
        let _ = store.lookup(&fp);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.lookups(), 1);
    }
}
