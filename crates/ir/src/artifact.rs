//! Low-level compiled artifacts and stable paths into them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One backend instruction. `name` and `resources` never change after
/// lowering, so clones may share them; `params` is always owned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instruction {
    pub name: Arc<str>,
    pub resources: Arc<[usize]>,
    pub params: Vec<f64>,
    /// Index of the job operation this instruction was lowered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<usize>,
}

impl Instruction {
    pub fn new(name: &str, resources: &[usize], params: Vec<f64>, origin: Option<usize>) -> Self {
        Self {
            name: Arc::from(name),
            resources: Arc::from(resources),
            params,
            origin,
        }
    }

    fn deep_clone(&self) -> Self {
        Self {
            name: Arc::from(&*self.name),
            resources: Arc::from(&*self.resources),
            params: self.params.clone(),
            origin: self.origin,
        }
    }

    fn same_layout(&self, other: &Instruction) -> bool {
        self.name == other.name
            && self.resources == other.resources
            && self.params.len() == other.params.len()
            && self.origin == other.origin
    }
}

/// Stable locator of one embedded numeric value: instruction index plus the
/// parameter field within that instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotPath {
    pub instruction: usize,
    pub field: usize,
}

impl SlotPath {
    pub fn new(instruction: usize, field: usize) -> Self {
        Self { instruction, field }
    }
}

impl fmt::Display for SlotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instructions[{}].params[{}]", self.instruction, self.field)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompiledArtifact {
    pub name: String,
    pub num_resources: usize,
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CompiledArtifact {
    pub fn new<N: Into<String>>(name: N, num_resources: usize) -> Self {
        Self {
            name: name.into(),
            num_resources,
            instructions: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn slot(&self, path: SlotPath) -> Option<f64> {
        self.instructions
            .get(path.instruction)
            .and_then(|inst| inst.params.get(path.field))
            .copied()
    }

    pub fn slot_mut(&mut self, path: SlotPath) -> Option<&mut f64> {
        self.instructions
            .get_mut(path.instruction)
            .and_then(|inst| inst.params.get_mut(path.field))
    }

    /// Every numeric slot, in instruction then field order.
    pub fn slots(&self) -> impl Iterator<Item = (SlotPath, f64)> + '_ {
        self.instructions
            .iter()
            .enumerate()
            .flat_map(|(index, inst)| {
                inst.params
                    .iter()
                    .enumerate()
                    .map(move |(field, value)| (SlotPath::new(index, field), *value))
            })
    }

    /// Copy that shares no allocation with `self`.
    pub fn deep_clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            num_resources: self.num_resources,
            instructions: self.instructions.iter().map(Instruction::deep_clone).collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// True when both artifacts have the same instructions in the same order,
    /// ignoring parameter values.
    pub fn same_layout(&self, other: &CompiledArtifact) -> bool {
        self.num_resources == other.num_resources
            && self.instructions.len() == other.instructions.len()
            && self
                .instructions
                .iter()
                .zip(&other.instructions)
                .all(|(a, b)| a.same_layout(b))
    }

    /// True when any instruction of `self` shares its name or resource
    /// allocation with `other`.
    pub fn shares_structure_with(&self, other: &CompiledArtifact) -> bool {
        self.instructions.iter().zip(&other.instructions).any(|(a, b)| {
            Arc::ptr_eq(&a.name, &b.name) || Arc::ptr_eq(&a.resources, &b.resources)
        })
    }

    pub fn all_finite(&self) -> bool {
        self.instructions
            .iter()
            .all(|inst| inst.params.iter().all(|value| value.is_finite()))
    }
}
