//! Turning jobs into artifacts, through the cache when possible.

use crate::entry::{CacheEntry, EntrySignature};
use crate::error::CacheError;
use crate::locator::SlotLocator;
use crate::store::MappingStore;
use anyhow::Result;
use paramcache_compiler::{CompileConfig, Compiler};
use paramcache_ir::artifact::CompiledArtifact;
use paramcache_ir::dialect::JobDescription;
use paramcache_ir::fingerprint::{Fingerprint, JobShape};
use tracing::{debug, warn};

enum Reuse {
    Hit(CompiledArtifact),
    Invalid(CacheError),
}

/// Owns the compile callback and the copy/validation policy; the store is
/// passed in so that one engine can serve any store.
#[derive(Debug)]
pub struct SubstitutionEngine<C> {
    compiler: C,
    isolate: bool,
    validate: bool,
}

impl<C: Compiler> SubstitutionEngine<C> {
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            isolate: true,
            validate: true,
        }
    }

    /// `false` returns artifacts that share immutable instruction structure
    /// with the cached template; only parameter storage is fresh.
    pub fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }

    /// `false` skips the signature check on hits. Callers doing so promise
    /// the job shape and config cannot drift under a fingerprint.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn isolate(&self) -> bool {
        self.isolate
    }

    pub fn validates(&self) -> bool {
        self.validate
    }

    /// Artifacts for `jobs`, in order. Jobs that share a fingerprint are
    /// compiled once per batch; later ones are served from the fresh entry.
    pub fn materialize(
        &self,
        jobs: &[JobDescription],
        store: &mut MappingStore,
        config: &CompileConfig,
    ) -> Result<Vec<CompiledArtifact>> {
        jobs.iter()
            .map(|job| self.materialize_one(job, store, config))
            .collect()
    }

    pub fn materialize_one(
        &self,
        job: &JobDescription,
        store: &mut MappingStore,
        config: &CompileConfig,
    ) -> Result<CompiledArtifact> {
        let shape = JobShape::of(job);
        let fingerprint = shape.fingerprint();
        let params = job.parameters();

        let reuse = store
            .lookup(&fingerprint)
            .map(|entry| self.reuse(&fingerprint, entry, job, &shape, &params, config));

        match reuse {
            Some(Reuse::Hit(artifact)) => {
                store.record_hit(&fingerprint);
                debug!(job = %job.name, fingerprint = %fingerprint.abbreviated(), "cache hit");
                Ok(artifact)
            }
            Some(Reuse::Invalid(reason)) => {
                store.record_invalid();
                match &reason {
                    CacheError::StructuralMismatch { .. } => {
                        warn!(job = %job.name, error = %reason, "rebuilding cache entry")
                    }
                    _ => debug!(job = %job.name, error = %reason, "rebuilding cache entry"),
                }
                self.compile_and_register(fingerprint, shape, job, store, config)
            }
            None => {
                debug!(job = %job.name, fingerprint = %fingerprint.abbreviated(), "cache miss");
                self.compile_and_register(fingerprint, shape, job, store, config)
            }
        }
    }

    fn reuse(
        &self,
        fingerprint: &Fingerprint,
        entry: &CacheEntry,
        job: &JobDescription,
        shape: &JobShape,
        params: &[f64],
        config: &CompileConfig,
    ) -> Reuse {
        if self.validate {
            if let Err(detail) = entry.signature().check(shape, config, entry.template()) {
                return Reuse::Invalid(CacheError::StructuralMismatch {
                    fingerprint: fingerprint.abbreviated(),
                    detail,
                });
            }
        }
        if let Some(index) = entry.blocking_parameter(params) {
            return Reuse::Invalid(CacheError::UntraceableParameter {
                job: job.name.clone(),
                index,
            });
        }
        match entry.substitute(params, self.isolate) {
            Some(mut artifact) => {
                artifact.name.clone_from(&job.name);
                Reuse::Hit(artifact)
            }
            None => Reuse::Invalid(CacheError::StructuralMismatch {
                fingerprint: fingerprint.abbreviated(),
                detail: "slot path outside the cached template".into(),
            }),
        }
    }

    fn compile_and_register(
        &self,
        fingerprint: Fingerprint,
        shape: JobShape,
        job: &JobDescription,
        store: &mut MappingStore,
        config: &CompileConfig,
    ) -> Result<CompiledArtifact> {
        let artifact = self.compiler.compile(job, config)?;
        let slots = SlotLocator::new(&self.compiler, config).locate(job, &artifact);
        let signature = EntrySignature::new(shape, config.clone(), artifact.instructions.len());
        let returned = if self.isolate {
            artifact.deep_clone()
        } else {
            artifact.clone()
        };
        store.insert(fingerprint, CacheEntry::new(artifact, slots, signature));
        Ok(returned)
    }
}
