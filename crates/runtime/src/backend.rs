//! Where materialized artifacts go to run.

use anyhow::Result;
use paramcache_ir::artifact::CompiledArtifact;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job: String,
    pub instructions: usize,
    pub checksum: f64,
}

/// Runs artifacts. Sessions call backends from worker threads, one artifact
/// per call.
pub trait Backend: Send + Sync {
    fn run(&self, artifact: &CompiledArtifact) -> Result<ExecutionResult>;
}

impl<F> Backend for F
where
    F: Fn(&CompiledArtifact) -> Result<ExecutionResult> + Send + Sync,
{
    fn run(&self, artifact: &CompiledArtifact) -> Result<ExecutionResult> {
        self(artifact)
    }
}

/// Reports a position-weighted sum of the embedded values, enough to tell
/// artifacts apart in tests and demos.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumBackend;

impl Backend for ChecksumBackend {
    fn run(&self, artifact: &CompiledArtifact) -> Result<ExecutionResult> {
        let checksum = artifact
            .slots()
            .enumerate()
            .map(|(index, (_, value))| value * (index + 1) as f64)
            .sum();
        Ok(ExecutionResult {
            job: artifact.name.clone(),
            instructions: artifact.instructions.len(),
            checksum,
        })
    }
}
