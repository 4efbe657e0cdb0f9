//! Transformation passes over lowered artifacts.

use crate::artifact::{CompiledArtifact, Instruction};
use anyhow::Result;
use tracing::debug;

pub trait Pass {
    fn name(&self) -> &str;
    fn run(&self, artifact: &mut CompiledArtifact) -> Result<()>;
}

/// Drops rotations that are exactly the identity: `u1(0)` and `u3(0, 0, 0)`.
pub struct ElideIdentityRotations;

impl Pass for ElideIdentityRotations {
    fn name(&self) -> &str {
        "elide-identity-rotations"
    }

    fn run(&self, artifact: &mut CompiledArtifact) -> Result<()> {
        let before = artifact.instructions.len();
        artifact.instructions.retain(|inst| !is_identity(inst));
        debug!(
            pass = self.name(),
            elided = before - artifact.instructions.len(),
            "elided identity rotations"
        );
        Ok(())
    }
}

fn is_identity(inst: &Instruction) -> bool {
    matches!(&*inst.name, "u1" | "u3") && inst.params.iter().all(|value| *value == 0.0)
}

/// Folds back-to-back `u1` phases on the same resource into one.
pub struct MergeAdjacentPhases;

impl Pass for MergeAdjacentPhases {
    fn name(&self) -> &str {
        "merge-adjacent-phases"
    }

    fn run(&self, artifact: &mut CompiledArtifact) -> Result<()> {
        let mut merged = 0;
        let mut out: Vec<Instruction> = Vec::with_capacity(artifact.instructions.len());
        for inst in artifact.instructions.drain(..) {
            if let Some(last) = out.last_mut() {
                if is_phase(last) && is_phase(&inst) && last.resources == inst.resources {
                    last.params[0] += inst.params[0];
                    merged += 1;
                    continue;
                }
            }
            out.push(inst);
        }
        artifact.instructions = out;
        debug!(pass = self.name(), merged, "merged adjacent phases");
        Ok(())
    }
}

fn is_phase(inst: &Instruction) -> bool {
    &*inst.name == "u1" && inst.params.len() == 1
}

pub struct PassPipeline {
    passes: Vec<Box<dyn Pass + Send + Sync>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Level 0 runs nothing, level 1 elides identities, level 2 also merges
    /// adjacent phases.
    pub fn for_level(level: u8) -> Self {
        let mut pipeline = Self::new();
        if level >= 2 {
            pipeline.add_pass(MergeAdjacentPhases);
        }
        if level >= 1 {
            pipeline.add_pass(ElideIdentityRotations);
        }
        pipeline
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: Pass + Send + Sync + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn run(&self, artifact: &mut CompiledArtifact) -> Result<()> {
        for pass in &self.passes {
            pass.run(artifact)?;
        }
        Ok(())
    }
}

impl Default for PassPipeline {
    fn default() -> Self {
        Self::new()
    }
}
