//! Cache session orchestration.

use crate::backend::{Backend, ExecutionResult};
use crate::options::CacheOptions;
use anyhow::{Context, Result};
use paramcache_cache::{CacheError, CacheStats, EncodedStore, MappingStore, SaveReport, SubstitutionEngine};
use paramcache_compiler::{CompileConfig, Compiler};
use paramcache_ir::artifact::CompiledArtifact;
use paramcache_ir::dialect::JobDescription;
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fs;
use tracing::{info, warn};

struct SessionState<C> {
    engine: SubstitutionEngine<C>,
    store: MappingStore,
    caching: bool,
    batches: u64,
    warmup_misses: u64,
    /// Bumped by every batch that recorded a miss.
    generation: u64,
}

/// What the cache file currently holds.
#[derive(Default)]
struct Persisted {
    generation: u64,
    last_error: Option<String>,
}

struct Snapshot {
    generation: u64,
    encoded: EncodedStore,
}

/// A compiler, a backend and the cache between them. Materialization is
/// serialized; backend runs happen on the session's worker pool and cache
/// file writes happen outside the materialization lock.
pub struct CacheSession<C, B> {
    state: Mutex<SessionState<C>>,
    persisted: Mutex<Persisted>,
    backend: B,
    pool: ThreadPool,
    config: CompileConfig,
    options: CacheOptions,
}

impl<C, B> CacheSession<C, B>
where
    C: Compiler + Send,
    B: Backend,
{
    pub fn open(compiler: C, backend: B, config: CompileConfig, options: CacheOptions) -> Result<Self> {
        if let Some(path) = &options.cache_file {
            if options.enabled && options.clear_cache_file && path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("failed to clear cache file {}", path.display()))?;
            }
        }

        let store = match &options.cache_file {
            Some(path) if options.enabled => match MappingStore::load_or_default(path) {
                Ok(store) => store,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring unreadable cache file");
                    MappingStore::new()
                }
            },
            _ => MappingStore::new(),
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(options.workers.unwrap_or(0))
            .thread_name(|index| format!("paramcache-worker-{index}"))
            .build()
            .context("failed to start backend workers")?;

        let engine = SubstitutionEngine::new(compiler)
            .with_isolation(options.isolate)
            .with_validation(!options.skip_validation);

        info!(
            enabled = options.enabled,
            entries = store.len(),
            isolate = options.isolate,
            validate = !options.skip_validation,
            workers = pool.current_num_threads(),
            "opened cache session"
        );

        Ok(Self {
            state: Mutex::new(SessionState {
                engine,
                store,
                caching: options.enabled,
                batches: 0,
                warmup_misses: 0,
                generation: 0,
            }),
            persisted: Mutex::new(Persisted::default()),
            backend,
            pool,
            config,
            options,
        })
    }

    /// Compile-only path: artifacts for `jobs`, in order. Entries added
    /// before a failing job are kept and flushed.
    pub fn materialize(&self, jobs: &[JobDescription]) -> Result<Vec<CompiledArtifact>> {
        let (artifacts, snapshot) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.caching {
                let compiler = state.engine.compiler();
                return jobs
                    .iter()
                    .map(|job| compiler.compile(job, &self.config))
                    .collect();
            }

            let misses_before = state.store.misses();
            let artifacts = state.engine.materialize(jobs, &mut state.store, &self.config);
            let misses = state.store.misses();

            state.batches += 1;
            if state.batches == 1 {
                state.warmup_misses = misses;
            }
            if let Some(allowed) = self.options.allowed_misses {
                let counted = misses - state.warmup_misses;
                if counted > allowed {
                    warn!(
                        misses = counted,
                        allowed, "cache is not paying off; compiling directly from now on"
                    );
                    state.caching = false;
                }
            }

            let snapshot = if misses > misses_before {
                state.generation += 1;
                self.snapshot(state)
            } else {
                Ok(None)
            };
            (artifacts, snapshot)
        };

        // Failures are recorded in `last_save_error`; the batch still succeeds.
        let _ = self.flush(snapshot);
        artifacts
    }

    /// Materialize `jobs` and run them on the backend. Results come back in
    /// input order.
    pub fn execute(&self, jobs: &[JobDescription]) -> Result<Vec<ExecutionResult>> {
        let artifacts = self.materialize(jobs)?;
        let backend = &self.backend;
        self.pool
            .install(|| artifacts.par_iter().map(|artifact| backend.run(artifact)).collect())
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().store.stats()
    }

    /// False once caching was disabled, either by the options or because
    /// the miss budget ran out.
    pub fn caching(&self) -> bool {
        self.state.lock().caching
    }

    pub fn last_save_error(&self) -> Option<String> {
        self.persisted.lock().last_error.clone()
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&MappingStore) -> R) -> R {
        f(&self.state.lock().store)
    }

    /// Write the store to the configured cache file if it gained entries
    /// since the last successful write. Sessions with caching disabled never
    /// touch the file.
    pub fn save(&self) -> Result<Option<SaveReport>, CacheError> {
        let snapshot = self.snapshot(&self.state.lock());
        self.flush(snapshot)
    }

    pub fn shutdown(&self) -> Result<()> {
        if let Some(report) = self.save()? {
            info!(
                path = %report.path.display(),
                entries = report.saved,
                stats = %self.stats(),
                "closed cache session"
            );
        }
        Ok(())
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    fn snapshot(&self, state: &SessionState<C>) -> Result<Option<Snapshot>, CacheError> {
        if !self.options.enabled
            || self.options.cache_file.is_none()
            || state.generation <= self.persisted.lock().generation
        {
            return Ok(None);
        }
        Ok(Some(Snapshot {
            generation: state.generation,
            encoded: state.store.encode()?,
        }))
    }

    fn flush(
        &self,
        snapshot: Result<Option<Snapshot>, CacheError>,
    ) -> Result<Option<SaveReport>, CacheError> {
        let snapshot = match snapshot {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(err) => return Err(self.record_failure(err)),
        };
        let Some(path) = &self.options.cache_file else {
            return Ok(None);
        };

        let mut persisted = self.persisted.lock();
        // a newer snapshot already reached the disk
        if persisted.generation >= snapshot.generation {
            return Ok(None);
        }
        match snapshot.encoded.write_to(path) {
            Ok(report) => {
                persisted.generation = snapshot.generation;
                persisted.last_error = None;
                Ok(Some(report))
            }
            Err(err) => {
                warn!(error = %err, "failed to save cache file");
                persisted.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn record_failure(&self, err: CacheError) -> CacheError {
        warn!(error = %err, "failed to save cache file");
        self.persisted.lock().last_error = Some(err.to_string());
        err
    }
}
