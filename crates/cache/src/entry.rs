//! Cache entries: a compiled template plus the rules that rebind its slots.

use paramcache_compiler::CompileConfig;
use paramcache_ir::artifact::{CompiledArtifact, SlotPath};
use paramcache_ir::fingerprint::JobShape;
use serde::{Deserialize, Serialize};

/// How a parameter value turns into the value embedded at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SlotRule {
    /// `embedded = scale * param + offset`
    Affine { scale: f64, offset: f64 },
}

impl SlotRule {
    pub const IDENTITY: SlotRule = SlotRule::Affine {
        scale: 1.0,
        offset: 0.0,
    };

    /// Fit an affine rule through two observed `(param, embedded)` points.
    /// Scales within rounding noise of a dyadic fraction are snapped to it so
    /// that exact lowerings (`θ`, `θ/2`, `-θ/2`) rebind bit-for-bit.
    pub fn fit(p0: f64, v0: f64, p1: f64, v1: f64) -> Self {
        let mut scale = (v1 - v0) / (p1 - p0);
        let snapped = (scale * 1024.0).round() / 1024.0;
        if (snapped - scale).abs() <= 1e-12 * scale.abs().max(1.0) {
            scale = snapped;
        }
        let mut offset = v0 - scale * p0;
        if offset.abs() <= 1e-15 * v0.abs().max(1.0) {
            offset = 0.0;
        }
        SlotRule::Affine { scale, offset }
    }

    pub fn apply(&self, param: f64) -> f64 {
        match *self {
            SlotRule::Affine { scale, offset } => {
                if offset == 0.0 {
                    scale * param
                } else {
                    scale * param + offset
                }
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        match *self {
            SlotRule::Affine { scale, offset } => scale.is_finite() && offset.is_finite(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotBinding {
    pub path: SlotPath,
    pub rule: SlotRule,
}

/// Where one job parameter lands inside the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamSlots {
    Traced { bindings: Vec<SlotBinding> },
    /// No embedded value could be tied to the parameter. The template is only
    /// reusable while the parameter keeps the value it was compiled with.
    Untraceable { base: f64 },
}

impl ParamSlots {
    pub fn is_traced(&self) -> bool {
        matches!(self, ParamSlots::Traced { .. })
    }

    pub fn bindings(&self) -> &[SlotBinding] {
        match self {
            ParamSlots::Traced { bindings } => bindings,
            ParamSlots::Untraceable { .. } => &[],
        }
    }
}

/// Exact description of what an entry was built from, checked on every hit
/// unless validation is switched off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignature {
    pub shape: JobShape,
    pub config: CompileConfig,
    pub instruction_count: usize,
}

impl EntrySignature {
    pub fn new(shape: JobShape, config: CompileConfig, instruction_count: usize) -> Self {
        Self {
            shape,
            config,
            instruction_count,
        }
    }

    /// `Err` carries a human-readable description of the first difference.
    pub fn check(
        &self,
        shape: &JobShape,
        config: &CompileConfig,
        template: &CompiledArtifact,
    ) -> Result<(), String> {
        if &self.config != config {
            return Err(format!(
                "compiled with {:?}, requested {:?}",
                self.config, config
            ));
        }
        if &self.shape != shape {
            return Err(format!(
                "entry has {} operations / {} parameters, job has {} / {}",
                self.shape.operations.len(),
                self.shape.num_parameters(),
                shape.operations.len(),
                shape.num_parameters()
            ));
        }
        if template.instructions.len() != self.instruction_count {
            return Err(format!(
                "template holds {} instructions, signature records {}",
                template.instructions.len(),
                self.instruction_count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    template: CompiledArtifact,
    slots: Vec<ParamSlots>,
    signature: EntrySignature,
    hits: u64,
}

impl CacheEntry {
    /// Panics when the slot list does not cover exactly the signature's
    /// parameters; such an entry cannot be used safely.
    pub fn new(template: CompiledArtifact, slots: Vec<ParamSlots>, signature: EntrySignature) -> Self {
        assert_eq!(
            slots.len(),
            signature.shape.num_parameters(),
            "cache entry for {} maps {} slots for {} parameters",
            template.name,
            slots.len(),
            signature.shape.num_parameters()
        );
        Self {
            template,
            slots,
            signature,
            hits: 0,
        }
    }

    pub fn template(&self) -> &CompiledArtifact {
        &self.template
    }

    pub fn slots(&self) -> &[ParamSlots] {
        &self.slots
    }

    pub fn signature(&self) -> &EntrySignature {
        &self.signature
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn num_parameters(&self) -> usize {
        self.slots.len()
    }

    pub fn untraceable(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slots)| !slots.is_traced())
            .map(|(index, _)| index)
    }

    /// First untraceable parameter whose new value differs (bitwise) from the
    /// value baked into the template.
    pub fn blocking_parameter(&self, params: &[f64]) -> Option<usize> {
        self.slots
            .iter()
            .zip(params)
            .position(|(slots, value)| match slots {
                ParamSlots::Untraceable { base } => base.to_bits() != value.to_bits(),
                ParamSlots::Traced { .. } => false,
            })
    }

    /// Clone the template and write `params` through every binding. Returns
    /// `None` when a binding points outside the template.
    pub fn substitute(&self, params: &[f64], isolate: bool) -> Option<CompiledArtifact> {
        assert_eq!(
            params.len(),
            self.slots.len(),
            "substituting {} parameters into an entry with {} slots",
            params.len(),
            self.slots.len()
        );
        let mut artifact = if isolate {
            self.template.deep_clone()
        } else {
            self.template.clone()
        };
        for (value, slots) in params.iter().zip(&self.slots) {
            for binding in slots.bindings() {
                *artifact.slot_mut(binding.path)? = binding.rule.apply(*value);
            }
        }
        Some(artifact)
    }

    /// Every binding resolves inside the template and every rule is finite.
    pub fn is_consistent(&self) -> bool {
        self.template.instructions.len() == self.signature.instruction_count
            && self.slots.iter().all(|slots| {
                slots
                    .bindings()
                    .iter()
                    .all(|b| self.template.slot(b.path).is_some() && b.rule.is_finite())
            })
    }
}

impl PartialEq for CacheEntry {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
            && self.slots == other.slots
            && self.signature == other.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paramcache_ir::artifact::Instruction;
    use paramcache_ir::builder::JobBuilder;

    fn entry() -> CacheEntry {
        let job = JobBuilder::new("e", 1).rz(0.5, 0).ry(0.0, 0).build();
        let mut template = CompiledArtifact::new("e", 1);
        template
            .instructions
            .push(Instruction::new("u1", &[0], vec![0.5], Some(0)));
        let slots = vec![
            ParamSlots::Traced {
                bindings: vec![SlotBinding {
                    path: SlotPath::new(0, 0),
                    rule: SlotRule::IDENTITY,
                }],
            },
            ParamSlots::Untraceable { base: 0.0 },
        ];
        let signature = EntrySignature::new(JobShape::of(&job), CompileConfig::default(), 1);
        CacheEntry::new(template, slots, signature)
    }

    #[test]
    fn fit_recovers_exact_half_angle() {
        let rule = SlotRule::fit(0.3, 0.15, 0.55, 0.275);
        assert_eq!(rule, SlotRule::Affine { scale: 0.5, offset: 0.0 });
        assert_eq!(rule.apply(0.8), 0.4);
    }

    #[test]
    fn fit_keeps_constant_offsets() {
        let rule = SlotRule::fit(0.0, 1.0, 1.0, 3.0);
        assert_eq!(rule, SlotRule::Affine { scale: 2.0, offset: 1.0 });
        assert_eq!(rule.apply(2.0), 5.0);
    }

    #[test]
    fn substitution_rewrites_traced_slots() {
        let entry = entry();
        let artifact = entry.substitute(&[1.25, 0.0], true).unwrap();
        assert_eq!(artifact.instructions[0].params, vec![1.25]);
        assert_eq!(entry.template().instructions[0].params, vec![0.5]);
    }

    #[test]
    fn untraceable_parameters_block_changed_values_only() {
        let entry = entry();
        assert_eq!(entry.blocking_parameter(&[9.0, 0.0]), None);
        assert_eq!(entry.blocking_parameter(&[9.0, 0.1]), Some(1));
        assert_eq!(entry.untraceable().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    #[should_panic(expected = "slots for")]
    fn slot_count_must_match_parameters() {
        let job = JobBuilder::new("e", 1).rz(0.5, 0).build();
        let signature = EntrySignature::new(JobShape::of(&job), CompileConfig::default(), 0);
        let _ = CacheEntry::new(CompiledArtifact::new("e", 1), vec![], signature);
    }
}
