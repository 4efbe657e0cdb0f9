//! Tracing job parameters to the numeric slots of a compiled artifact.
//!
//! The compiler is a black box, so slots are found by recompiling the job
//! with perturbed parameters and diffing against the base artifact. Round
//! `r` perturbs the `r`-th parameter of every operation at once; the
//! instruction's `origin` says which operation a changed field belongs to.
//! Rounds that restructure the artifact fall back to one parameter per
//! probe. Verification compiles with differently shaped perturbations reject
//! every parameter whose fitted rule does not predict the outcome, or whose
//! perturbation moves a slot it is not bound to.

use crate::entry::{ParamSlots, SlotBinding, SlotRule};
use paramcache_compiler::{CompileConfig, Compiler};
use paramcache_ir::artifact::{CompiledArtifact, SlotPath};
use paramcache_ir::dialect::JobDescription;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const VERIFY_TOLERANCE: f64 = 1e-9;

fn probe_step(index: usize) -> f64 {
    0.25 + 0.03125 * (index % 8) as f64
}

fn verify_step(index: usize) -> f64 {
    -(0.15 + 0.0546875 * ((5 * index + 3) % 11) as f64)
}

fn same_value(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || a == b
}

fn close(actual: f64, predicted: f64) -> bool {
    (actual - predicted).abs() <= VERIFY_TOLERANCE * actual.abs().max(predicted.abs()).max(1.0)
}

#[derive(Debug, PartialEq)]
enum Check {
    Explained,
    Mispredicted(Vec<usize>),
    /// A slot changed that no binding of the perturbed parameters covers, or
    /// the layout changed.
    Unexplained,
}

pub struct SlotLocator<'a, C: ?Sized> {
    compiler: &'a C,
    config: &'a CompileConfig,
}

impl<'a, C: Compiler + ?Sized> SlotLocator<'a, C> {
    pub fn new(compiler: &'a C, config: &'a CompileConfig) -> Self {
        Self { compiler, config }
    }

    /// One `ParamSlots` per job parameter, in flattened parameter order.
    /// `artifact` must be what the compiler produced for `job` under the
    /// locator's config.
    pub fn locate(&self, job: &JobDescription, artifact: &CompiledArtifact) -> Vec<ParamSlots> {
        let base = job.parameters();
        let owners = job.parameter_owners();
        let rounds = owners.iter().map(|(_, index)| index + 1).max().unwrap_or(0);

        let mut bindings: Vec<Vec<SlotBinding>> = vec![Vec::new(); base.len()];
        let mut untraceable = vec![false; base.len()];
        let mut probes = 0;

        for round in 0..rounds {
            let members: Vec<usize> = owners
                .iter()
                .enumerate()
                .filter(|(_, (_, index))| *index == round)
                .map(|(k, _)| k)
                .collect();

            probes += 1;
            if let Some(found) = self.probe(job, artifact, &base, &owners, &members) {
                for (k, binding) in found {
                    bindings[k].push(binding);
                }
                continue;
            }

            if let [single] = members[..] {
                untraceable[single] = true;
                continue;
            }
            // Something in the round restructured the artifact or escaped
            // provenance; isolate the culprits one parameter at a time.
            for &k in &members {
                probes += 1;
                match self.probe(job, artifact, &base, &owners, &[k]) {
                    Some(found) => bindings[k].extend(found.into_iter().map(|(_, b)| b)),
                    None => untraceable[k] = true,
                }
            }
        }

        probes += self.verify(job, artifact, &base, &bindings, &mut untraceable);

        let slots: Vec<ParamSlots> = bindings
            .into_iter()
            .zip(untraceable)
            .zip(&base)
            .map(|((bindings, untraceable), &value)| {
                if untraceable || bindings.is_empty() {
                    ParamSlots::Untraceable { base: value }
                } else {
                    ParamSlots::Traced { bindings }
                }
            })
            .collect();

        debug!(
            job = %job.name,
            parameters = slots.len(),
            traced = slots.iter().filter(|s| s.is_traced()).count(),
            probes,
            "located parameter slots"
        );
        slots
    }

    /// Perturb `members` together and attribute every changed slot. With more
    /// than one member a slot is attributed through its instruction's origin;
    /// `None` when the layout changed or a slot cannot be attributed.
    fn probe(
        &self,
        job: &JobDescription,
        artifact: &CompiledArtifact,
        base: &[f64],
        owners: &[(usize, usize)],
        members: &[usize],
    ) -> Option<Vec<(usize, SlotBinding)>> {
        let mut params = base.to_vec();
        for &k in members {
            params[k] += probe_step(k);
        }
        let probe = self.compile_like(job, &params, artifact)?;

        let by_operation: HashMap<usize, usize> =
            members.iter().map(|&k| (owners[k].0, k)).collect();
        let mut found = Vec::new();
        for ((path, v0), (_, v1)) in artifact.slots().zip(probe.slots()) {
            if same_value(v0, v1) {
                continue;
            }
            let owner = match members {
                [single] => Some(*single),
                _ => artifact.instructions[path.instruction]
                    .origin
                    .and_then(|op| by_operation.get(&op).copied()),
            };
            let Some(k) = owner else {
                debug!(job = %job.name, slot = %path, "changed slot without provenance");
                return None;
            };
            found.push((
                k,
                SlotBinding {
                    path,
                    rule: SlotRule::fit(base[k], v0, params[k], v1),
                },
            ));
        }
        Some(found)
    }

    /// Check the fitted bindings against compiles with differently sized
    /// perturbations. Parameters whose bindings mispredict are dropped. When a
    /// changed slot is explained by no surviving binding, every traced
    /// parameter is checked on its own, and a second unexplained change
    /// drops them all. Returns the number of compiles spent.
    fn verify(
        &self,
        job: &JobDescription,
        artifact: &CompiledArtifact,
        base: &[f64],
        bindings: &[Vec<SlotBinding>],
        untraceable: &mut [bool],
    ) -> usize {
        let mut compiles = 0;
        let mut isolated = false;
        while untraceable.iter().any(|flag| !flag) {
            let traced: Vec<usize> = (0..base.len()).filter(|&k| !untraceable[k]).collect();
            compiles += 1;
            match self.check(job, artifact, base, bindings, &traced) {
                Check::Explained => break,
                Check::Mispredicted(failed) => {
                    for k in failed {
                        untraceable[k] = true;
                    }
                }
                _ if !isolated => {
                    debug!(job = %job.name, "joint verification unexplained; checking parameters alone");
                    isolated = true;
                    for k in traced {
                        compiles += 1;
                        if self.check(job, artifact, base, bindings, &[k]) != Check::Explained {
                            untraceable[k] = true;
                        }
                    }
                }
                _ => {
                    debug!(job = %job.name, "verification changed a slot no parameter explains");
                    untraceable.iter_mut().for_each(|flag| *flag = true);
                }
            }
        }
        compiles
    }

    /// Perturb `perturbed` (everything else stays at `base`) and compare the
    /// outcome against what their bindings predict.
    fn check(
        &self,
        job: &JobDescription,
        artifact: &CompiledArtifact,
        base: &[f64],
        bindings: &[Vec<SlotBinding>],
        perturbed: &[usize],
    ) -> Check {
        let mut params = base.to_vec();
        for &k in perturbed {
            params[k] += verify_step(k);
        }
        let Some(outcome) = self.compile_like(job, &params, artifact) else {
            return Check::Unexplained;
        };

        let failed: Vec<usize> = perturbed
            .iter()
            .copied()
            .filter(|&k| {
                bindings[k].iter().any(|binding| {
                    let predicted = binding.rule.apply(params[k]);
                    !outcome
                        .slot(binding.path)
                        .is_some_and(|actual| close(actual, predicted))
                })
            })
            .collect();
        if !failed.is_empty() {
            return Check::Mispredicted(failed);
        }

        let covered: BTreeSet<SlotPath> = perturbed
            .iter()
            .flat_map(|&k| bindings[k].iter().map(|binding| binding.path))
            .collect();
        let unexplained = artifact
            .slots()
            .zip(outcome.slots())
            .any(|((path, v0), (_, v1))| !covered.contains(&path) && !same_value(v0, v1));
        if unexplained {
            Check::Unexplained
        } else {
            Check::Explained
        }
    }

    /// Compile `job` rebound to `params`; `None` when compilation fails or the
    /// result is not laid out like `reference`.
    fn compile_like(
        &self,
        job: &JobDescription,
        params: &[f64],
        reference: &CompiledArtifact,
    ) -> Option<CompiledArtifact> {
        let probe_job = job.with_parameters(params).ok()?;
        match self.compiler.compile(&probe_job, self.config) {
            Ok(probe) if probe.same_layout(reference) => Some(probe),
            Ok(probe) => {
                debug!(
                    job = %job.name,
                    expected = reference.instructions.len(),
                    emitted = probe.instructions.len(),
                    "probe changed the artifact layout"
                );
                None
            }
            Err(err) => {
                debug!(job = %job.name, error = %err, "probe compilation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramcache_compiler::BasisCompiler;
    use paramcache_ir::builder::JobBuilder;
    use paramcache_ir::artifact::Instruction;

    fn locate(job: &JobDescription, config: &CompileConfig) -> (CompiledArtifact, Vec<ParamSlots>) {
        let artifact = BasisCompiler.compile(job, config).unwrap();
        let slots = SlotLocator::new(&BasisCompiler, config).locate(job, &artifact);
        (artifact, slots)
    }

    #[test]
    fn one_parameter_can_feed_several_slots() {
        let job = JobBuilder::new("crz", 2).h(0).crz(0.6, 0, 1).build();
        let (_, slots) = locate(&job, &CompileConfig::with_resources(2));
        assert_eq!(slots.len(), 1);
        let bindings = slots[0].bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].rule, SlotRule::Affine { scale: 0.5, offset: 0.0 });
        assert_eq!(bindings[1].rule, SlotRule::Affine { scale: -0.5, offset: 0.0 });
    }

    #[test]
    fn u3_parameters_map_to_their_own_fields() {
        let job = JobBuilder::new("u3", 1).u3(0.1, 0.2, 0.3, 0).build();
        let (_, slots) = locate(&job, &CompileConfig::with_resources(1));
        let fields: Vec<usize> = slots.iter().map(|s| s.bindings()[0].path.field).collect();
        assert_eq!(fields, vec![0, 1, 2]);
    }

    #[test]
    fn elided_rotation_is_untraceable() {
        let job = JobBuilder::new("zero", 1).rz(0.0, 0).ry(0.4, 0).build();
        let (artifact, slots) = locate(&job, &CompileConfig::with_resources(1));
        assert_eq!(artifact.instructions.len(), 1);
        assert_eq!(slots[0], ParamSlots::Untraceable { base: 0.0 });
        assert!(slots[1].is_traced());
    }

    #[test]
    fn merged_phases_are_untraceable() {
        let job = JobBuilder::new("merge", 1).rz(0.3, 0).rz(0.2, 0).build();
        let config = CompileConfig::with_resources(1).with_optimization_level(2);
        let (artifact, slots) = locate(&job, &config);
        assert_eq!(artifact.instructions.len(), 1);
        assert!(slots.iter().all(|s| !s.is_traced()));
    }

    #[test]
    fn phases_merged_across_operations_are_untraceable() {
        let job = JobBuilder::new("merge-crz", 2)
            .rz(0.3, 1)
            .crz(0.4, 0, 1)
            .ry(0.7, 0)
            .build();
        let config = CompileConfig::with_resources(2).with_optimization_level(2);
        let (artifact, slots) = locate(&job, &config);
        // u1(a + t/2), cx, u1(-t/2), cx, u3
        assert_eq!(artifact.instructions.len(), 5);
        assert_eq!(slots[0], ParamSlots::Untraceable { base: 0.3 });
        assert_eq!(slots[1], ParamSlots::Untraceable { base: 0.4 });
        assert_eq!(slots[2].bindings()[0].path, SlotPath::new(4, 0));
    }

    #[test]
    fn single_parameter_rounds_need_no_provenance() {
        let compiler = |job: &JobDescription, _: &CompileConfig| -> anyhow::Result<CompiledArtifact> {
            let mut artifact = CompiledArtifact::new(job.name.clone(), job.num_resources);
            for op in &job.operations {
                artifact
                    .instructions
                    .push(Instruction::new("u1", &op.resources, op.params.clone(), None));
            }
            Ok(artifact)
        };
        let job = JobBuilder::new("anon", 1).rz(0.3, 0).build();
        let config = CompileConfig::with_resources(1);
        let artifact = compiler.compile(&job, &config).unwrap();
        let slots = SlotLocator::new(&compiler, &config).locate(&job, &artifact);
        assert_eq!(
            slots,
            vec![ParamSlots::Traced {
                bindings: vec![SlotBinding {
                    path: SlotPath::new(0, 0),
                    rule: SlotRule::IDENTITY,
                }],
            }]
        );
    }

    #[test]
    fn nonlinear_lowering_fails_verification() {
        let compiler = |job: &JobDescription, _: &CompileConfig| -> anyhow::Result<CompiledArtifact> {
            let mut artifact = CompiledArtifact::new(job.name.clone(), job.num_resources);
            for (index, op) in job.operations.iter().enumerate() {
                let squared = op.params.iter().map(|p| p * p).collect();
                artifact
                    .instructions
                    .push(Instruction::new("u1", &op.resources, squared, Some(index)));
            }
            Ok(artifact)
        };
        let job = JobBuilder::new("square", 1).rz(0.7, 0).build();
        let config = CompileConfig::with_resources(1);
        let artifact = compiler.compile(&job, &config).unwrap();
        let slots = SlotLocator::new(&compiler, &config).locate(&job, &artifact);
        assert!(!slots[0].is_traced());
    }

    #[test]
    fn parameterless_jobs_need_no_probes() {
        let job = JobBuilder::new("bell", 2).h(0).cx(0, 1).build();
        let (_, slots) = locate(&job, &CompileConfig::with_resources(2));
        assert!(slots.is_empty());
    }
}
