//! Durable storage for mapping stores.
//!
//! A cache file is one JSON document holding two parallel collections:
//! `mappings[i]` (fingerprint, signature, slot list) describes
//! `templates[i]` (the compiled artifact). The header names the format and
//! its version so that incompatible readers fail instead of guessing.

use crate::entry::{CacheEntry, EntrySignature, ParamSlots};
use crate::error::CacheError;
use crate::store::MappingStore;
use paramcache_ir::artifact::CompiledArtifact;
use paramcache_ir::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

pub const FORMAT_TAG: &str = "paramcache";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub fingerprint: Fingerprint,
    pub signature: EntrySignature,
    pub slots: Vec<ParamSlots>,
}

impl MappingRecord {
    pub fn traced(&self) -> usize {
        self.slots.iter().filter(|s| s.is_traced()).count()
    }
}

#[derive(Serialize)]
struct CacheFileOut<'a> {
    format: &'a str,
    format_version: u32,
    mappings: Vec<MappingRecord>,
    templates: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct CacheFileIn {
    mappings: Vec<MappingRecord>,
    templates: Vec<CompiledArtifact>,
}

#[derive(Deserialize)]
struct MappingsOnly {
    mappings: Vec<MappingRecord>,
}

#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    format_version: Option<u32>,
}

/// Outcome of a save: entries written, and entries left out because they
/// could not be encoded losslessly.
#[derive(Debug)]
pub struct SaveReport {
    pub path: PathBuf,
    pub saved: usize,
    pub skipped: Vec<CacheError>,
}

/// A store serialized in memory, ready to be written out.
#[derive(Debug)]
pub struct EncodedStore {
    blob: Vec<u8>,
    saved: usize,
    skipped: Vec<CacheError>,
}

impl EncodedStore {
    /// Replace `path` atomically: the document goes to a temporary file next
    /// to `path` and is renamed over it once fully written.
    pub fn write_to(self, path: &Path) -> Result<SaveReport, CacheError> {
        write_atomically(path, &self.blob)?;
        info!(
            path = %path.display(),
            entries = self.saved,
            skipped = self.skipped.len(),
            bytes = self.blob.len(),
            "saved cache file"
        );
        Ok(SaveReport {
            path: path.to_path_buf(),
            saved: self.saved,
            skipped: self.skipped,
        })
    }
}

impl MappingStore {
    /// Serialize every entry that can be encoded losslessly.
    pub fn encode(&self) -> Result<EncodedStore, CacheError> {
        let mut mappings = Vec::with_capacity(self.len());
        let mut templates = Vec::with_capacity(self.len());
        let mut skipped = Vec::new();

        for (fingerprint, entry) in self.iter() {
            match encode_entry(fingerprint, entry) {
                Ok((record, template)) => {
                    mappings.push(record);
                    templates.push(template);
                }
                Err(err) => {
                    warn!(error = %err, "skipping cache entry");
                    skipped.push(err);
                }
            }
        }

        let document = CacheFileOut {
            format: FORMAT_TAG,
            format_version: FORMAT_VERSION,
            mappings,
            templates,
        };
        let blob = serde_json::to_vec_pretty(&document).map_err(|err| CacheError::Serialization {
            fingerprint: "<document>".into(),
            detail: err.to_string(),
        })?;
        Ok(EncodedStore {
            blob,
            saved: document.mappings.len(),
            skipped,
        })
    }

    pub fn save_to_file(&self, path: &Path) -> Result<SaveReport, CacheError> {
        self.encode()?.write_to(path)
    }

    /// Restore a store saved by [`MappingStore::save_to_file`]. Counters of
    /// the restored store start at zero.
    pub fn load_from_file(path: &Path) -> Result<Self, CacheError> {
        let data = fs::read(path).map_err(|err| CacheError::io(path, err))?;
        check_header(path, &data)?;
        let file: CacheFileIn =
            serde_json::from_slice(&data).map_err(|err| CacheError::decode(path, err))?;
        if file.mappings.len() != file.templates.len() {
            return Err(CacheError::decode(
                path,
                format!(
                    "{} mappings but {} templates",
                    file.mappings.len(),
                    file.templates.len()
                ),
            ));
        }

        let mut store = MappingStore::new();
        for (record, template) in file.mappings.into_iter().zip(file.templates) {
            let entry = decode_entry(path, &record, template)?;
            store.insert(record.fingerprint, entry);
        }
        info!(path = %path.display(), entries = store.len(), "loaded cache file");
        Ok(store)
    }

    /// Like [`MappingStore::load_from_file`], but a missing file is an empty
    /// store.
    pub fn load_or_default(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Self::load_from_file(path)
    }
}

/// Read only the mapping list of a cache file; templates are skipped
/// without being decoded.
pub fn read_mappings(path: &Path) -> Result<Vec<MappingRecord>, CacheError> {
    let data = fs::read(path).map_err(|err| CacheError::io(path, err))?;
    check_header(path, &data)?;
    let file: MappingsOnly =
        serde_json::from_slice(&data).map_err(|err| CacheError::decode(path, err))?;
    Ok(file.mappings)
}

fn check_header(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let header: Header = serde_json::from_slice(data).map_err(|err| CacheError::decode(path, err))?;
    match (header.format.as_deref(), header.format_version) {
        (Some(FORMAT_TAG), Some(FORMAT_VERSION)) => Ok(()),
        (format, version) => Err(CacheError::Format {
            path: path.to_path_buf(),
            found: format!(
                "{}/v{}",
                format.unwrap_or("<none>"),
                version.map_or_else(|| "?".to_string(), |v| v.to_string())
            ),
            expected: format!("{}/v{}", FORMAT_TAG, FORMAT_VERSION),
        }),
    }
}

fn encode_entry(
    fingerprint: &Fingerprint,
    entry: &CacheEntry,
) -> Result<(MappingRecord, serde_json::Value), CacheError> {
    let lossy = |detail: String| CacheError::Serialization {
        fingerprint: fingerprint.abbreviated(),
        detail,
    };
    if !entry.template().all_finite() {
        return Err(lossy("template embeds a non-finite value".into()));
    }
    let finite_slots = entry.slots().iter().all(|slots| match slots {
        ParamSlots::Traced { bindings } => bindings.iter().all(|b| b.rule.is_finite()),
        ParamSlots::Untraceable { base } => base.is_finite(),
    });
    if !finite_slots {
        return Err(lossy("slot mapping holds a non-finite value".into()));
    }

    let template = serde_json::to_value(entry.template()).map_err(|err| lossy(err.to_string()))?;
    let record = MappingRecord {
        fingerprint: fingerprint.clone(),
        signature: entry.signature().clone(),
        slots: entry.slots().to_vec(),
    };
    Ok((record, template))
}

fn decode_entry(
    path: &Path,
    record: &MappingRecord,
    template: CompiledArtifact,
) -> Result<CacheEntry, CacheError> {
    if record.signature.shape.fingerprint() != record.fingerprint {
        return Err(CacheError::decode(
            path,
            format!("fingerprint {} does not match its signature", record.fingerprint.abbreviated()),
        ));
    }
    let expected = record.signature.shape.num_parameters();
    if record.slots.len() != expected {
        return Err(CacheError::decode(
            path,
            format!(
                "{} maps {} slots for {} parameters",
                record.fingerprint.abbreviated(),
                record.slots.len(),
                expected
            ),
        ));
    }
    let entry = CacheEntry::new(template, record.slots.clone(), record.signature.clone());
    if !entry.is_consistent() {
        return Err(CacheError::decode(
            path,
            format!("{} has slot paths outside its template", record.fingerprint.abbreviated()),
        ));
    }
    Ok(entry)
}

fn write_atomically(path: &Path, blob: &[u8]) -> Result<(), CacheError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|err| CacheError::io(dir, err))?;
    let mut file = NamedTempFile::new_in(dir).map_err(|err| CacheError::io(dir, err))?;
    file.write_all(blob).map_err(|err| CacheError::io(file.path(), err))?;
    file.as_file()
        .sync_all()
        .map_err(|err| CacheError::io(file.path(), err))?;
    file.persist(path)
        .map_err(|err| CacheError::io(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SubstitutionEngine;
    use paramcache_compiler::{BasisCompiler, CompileConfig};
    use paramcache_ir::builder::JobBuilder;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn populated() -> MappingStore {
        let engine = SubstitutionEngine::new(BasisCompiler);
        let mut store = MappingStore::new();
        let config = CompileConfig::with_resources(2);
        let jobs = vec![
            JobBuilder::new("a", 2).ry(0.2, 0).cx(0, 1).rz(0.4, 1).build(),
            JobBuilder::new("b", 2).rz(0.0, 0).crz(0.3, 0, 1).build(),
        ];
        engine.materialize(&jobs, &mut store, &config).unwrap();
        store
    }

    #[test]
    fn round_trip_preserves_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = populated();
        let report = store.save_to_file(&path).unwrap();
        assert_eq!(report.saved, 2);
        assert!(report.skipped.is_empty());

        let loaded = MappingStore::load_from_file(&path).unwrap();
        assert!(loaded.same_entries(&store));
        assert_eq!(loaded.stats().lookups, 0);
    }

    #[test]
    fn saving_twice_is_byte_identical() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        populated().save_to_file(&first).unwrap();
        populated().save_to_file(&second).unwrap();
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }

    #[test]
    fn mappings_can_be_read_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        populated().save_to_file(&path).unwrap();
        let mappings = read_mappings(&path).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].slots.len(), 2);
        assert_eq!(mappings[1].traced(), 1);
    }

    #[test]
    fn version_mismatch_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        populated().save_to_file(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("\"format_version\": 1", "\"format_version\": 99")).unwrap();

        let err = MappingStore::load_from_file(&path).unwrap_err();
        assert!(matches!(err, CacheError::Format { .. }), "{err}");
        assert!(read_mappings(&path).is_err());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"\x80not json").unwrap();
        let err = MappingStore::load_from_file(&path).unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
        assert!(err.is_format_error());
    }

    #[test]
    fn missing_file_is_io_error_or_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(
            MappingStore::load_from_file(&path),
            Err(CacheError::Io { .. })
        ));
        assert!(MappingStore::load_or_default(&path).unwrap().is_empty());
    }

    #[test]
    fn non_finite_entries_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = populated();
        let config = CompileConfig::with_resources(1);
        let engine = SubstitutionEngine::new(BasisCompiler);
        let job = JobBuilder::new("nan", 1).u3(0.1, f64::INFINITY, 0.2, 0).build();
        engine.materialize_one(&job, &mut store, &config).unwrap();
        assert_eq!(store.len(), 3);

        let report = store.save_to_file(&path).unwrap();
        assert_eq!(report.saved, 2);
        assert!(matches!(report.skipped[..], [CacheError::Serialization { .. }]));
        assert_eq!(MappingStore::load_from_file(&path).unwrap().len(), 2);
    }

    #[test]
    fn tampered_slot_list_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        populated().save_to_file(&path).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        doc["mappings"][0]["slots"].as_array_mut().unwrap().pop();
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
        assert!(matches!(
            MappingStore::load_from_file(&path),
            Err(CacheError::Decode { .. })
        ));
    }
}
