//! Lowering from the job dialect to basis instructions.

use crate::artifact::{CompiledArtifact, Instruction};
use crate::dialect::{JobDescription, OpKind, Operation};
use crate::passes::PassPipeline;
use anyhow::Result;
use std::f64::consts::{FRAC_PI_2, PI};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoweringTarget {
    /// `u1`, `u2`, `u3`, `cx`, `barrier`, `measure`.
    U3Basis,
}

pub fn lower(job: &JobDescription, target: LoweringTarget) -> CompiledArtifact {
    let mut artifact = CompiledArtifact::new(job.name.clone(), job.num_resources);
    for (index, operation) in job.operations.iter().enumerate() {
        match target {
            LoweringTarget::U3Basis => lower_to_u3_basis(operation, index, &mut artifact.instructions),
        }
    }
    artifact
}

pub fn lower_with_passes(
    job: &JobDescription,
    target: LoweringTarget,
    pipeline: &PassPipeline,
) -> Result<CompiledArtifact> {
    let mut artifact = lower(job, target);
    let lowered = artifact.instructions.len();
    pipeline.run(&mut artifact)?;
    debug!(
        job = %job.name,
        lowered,
        emitted = artifact.instructions.len(),
        "lowered job"
    );
    Ok(artifact)
}

fn lower_to_u3_basis(op: &Operation, origin: usize, out: &mut Vec<Instruction>) {
    let origin = Some(origin);
    let param = |index: usize| op.params.get(index).copied().unwrap_or_default();
    let r = &op.resources;
    match op.kind {
        OpKind::H => out.push(Instruction::new("u2", r, vec![0.0, PI], origin)),
        OpKind::X => out.push(Instruction::new("u3", r, vec![PI, 0.0, PI], origin)),
        OpKind::Cx => out.push(Instruction::new("cx", r, vec![], origin)),
        OpKind::Rx => out.push(Instruction::new(
            "u3",
            r,
            vec![param(0), -FRAC_PI_2, FRAC_PI_2],
            origin,
        )),
        OpKind::Ry => out.push(Instruction::new("u3", r, vec![param(0), 0.0, 0.0], origin)),
        OpKind::Rz => out.push(Instruction::new("u1", r, vec![param(0)], origin)),
        OpKind::Rzz => {
            let (a, b) = (r[0], r[1]);
            out.push(Instruction::new("cx", &[a, b], vec![], origin));
            out.push(Instruction::new("u1", &[b], vec![param(0)], origin));
            out.push(Instruction::new("cx", &[a, b], vec![], origin));
        }
        OpKind::Crz => {
            let (control, target) = (r[0], r[1]);
            out.push(Instruction::new("u1", &[target], vec![param(0) / 2.0], origin));
            out.push(Instruction::new("cx", &[control, target], vec![], origin));
            out.push(Instruction::new("u1", &[target], vec![-param(0) / 2.0], origin));
            out.push(Instruction::new("cx", &[control, target], vec![], origin));
        }
        OpKind::U3 => out.push(Instruction::new(
            "u3",
            r,
            vec![param(0), param(1), param(2)],
            origin,
        )),
        OpKind::Barrier => out.push(Instruction::new("barrier", r, vec![], origin)),
        OpKind::Measure => out.push(Instruction::new("measure", r, vec![], origin)),
    }
}
