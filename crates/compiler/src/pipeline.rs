//! Compile callback seam and the reference basis compiler.

use anyhow::{bail, Result};
use paramcache_ir::artifact::CompiledArtifact;
use paramcache_ir::dialect::JobDescription;
use paramcache_ir::lowering::{lower_with_passes, LoweringTarget};
use paramcache_ir::passes::PassPipeline;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Execution configuration handed to the compiler alongside every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Width of the execution target; jobs may use at most this many resources.
    pub num_resources: usize,
    pub optimization_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shots: Option<u32>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            num_resources: 32,
            optimization_level: 1,
            shots: None,
        }
    }
}

impl CompileConfig {
    pub fn with_resources(num_resources: usize) -> Self {
        Self {
            num_resources,
            ..Self::default()
        }
    }

    pub fn with_optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_shots(mut self, shots: u32) -> Self {
        self.shots = Some(shots);
        self
    }
}

/// Produces a backend artifact from a job. The cache never looks inside a
/// compiler; it only calls it on a miss and while locating slots.
pub trait Compiler {
    fn compile(&self, job: &JobDescription, config: &CompileConfig) -> Result<CompiledArtifact>;
}

impl<F> Compiler for F
where
    F: Fn(&JobDescription, &CompileConfig) -> Result<CompiledArtifact>,
{
    fn compile(&self, job: &JobDescription, config: &CompileConfig) -> Result<CompiledArtifact> {
        self(job, config)
    }
}

/// Lowers to the `u1/u2/u3/cx` basis and runs the pass pipeline selected by
/// the config's optimization level.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasisCompiler;

impl Compiler for BasisCompiler {
    fn compile(&self, job: &JobDescription, config: &CompileConfig) -> Result<CompiledArtifact> {
        job.validate()?;
        if job.num_resources > config.num_resources {
            bail!(
                "job {} needs {} resources but the target provides {}",
                job.name,
                job.num_resources,
                config.num_resources
            );
        }

        let pipeline = PassPipeline::for_level(config.optimization_level);
        let mut artifact = lower_with_passes(job, LoweringTarget::U3Basis, &pipeline)?;
        artifact.num_resources = config.num_resources;
        artifact.metadata.insert(
            "optimization_level".into(),
            config.optimization_level.to_string(),
        );
        if let Some(shots) = config.shots {
            artifact.metadata.insert("shots".into(), shots.to_string());
        }
        Ok(artifact)
    }
}

/// Wraps a compiler and counts how often it is invoked.
#[derive(Debug, Default)]
pub struct CountingCompiler<C> {
    inner: C,
    calls: AtomicUsize,
}

impl<C> CountingCompiler<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl<C: Compiler> Compiler for CountingCompiler<C> {
    fn compile(&self, job: &JobDescription, config: &CompileConfig) -> Result<CompiledArtifact> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.compile(job, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramcache_ir::builder::JobBuilder;

    #[test]
    fn compiles_and_records_config() -> Result<()> {
        let job = JobBuilder::new("bell", 2).h(0).cx(0, 1).measure(1).build();
        let config = CompileConfig::with_resources(4).with_shots(1024);
        let artifact = BasisCompiler.compile(&job, &config)?;
        assert_eq!(artifact.num_resources, 4);
        assert_eq!(artifact.instructions.len(), 3);
        assert_eq!(artifact.metadata.get("shots").map(String::as_str), Some("1024"));
        Ok(())
    }

    #[test]
    fn rejects_jobs_wider_than_target() {
        let job = JobBuilder::new("wide", 3).h(2).build();
        assert!(BasisCompiler
            .compile(&job, &CompileConfig::with_resources(2))
            .is_err());
    }

    #[test]
    fn level_one_elides_zero_rotations() -> Result<()> {
        let job = JobBuilder::new("z", 1).rz(0.0, 0).ry(0.5, 0).build();
        let kept = BasisCompiler.compile(&job, &CompileConfig::with_resources(1).with_optimization_level(0))?;
        let elided = BasisCompiler.compile(&job, &CompileConfig::with_resources(1))?;
        assert_eq!(kept.instructions.len(), 2);
        assert_eq!(elided.instructions.len(), 1);
        Ok(())
    }

    #[test]
    fn counting_compiler_counts() -> Result<()> {
        let compiler = CountingCompiler::new(BasisCompiler);
        let job = JobBuilder::new("c", 1).rx(0.1, 0).build();
        compiler.compile(&job, &CompileConfig::default())?;
        compiler.compile(&job, &CompileConfig::default())?;
        assert_eq!(compiler.calls(), 2);
        Ok(())
    }

    #[test]
    fn closures_are_compilers() -> Result<()> {
        let compiler = |job: &JobDescription, _: &CompileConfig| -> Result<CompiledArtifact> {
            Ok(CompiledArtifact::new(job.name.clone(), job.num_resources))
        };
        let job = JobBuilder::new("closure", 1).build();
        assert_eq!(compiler.compile(&job, &CompileConfig::default())?.name, "closure");
        Ok(())
    }
}
