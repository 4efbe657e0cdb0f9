//! Structural identity of jobs, independent of parameter values.

use crate::dialect::{JobDescription, OpKind};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Parameter-free view of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpShape {
    pub kind: OpKind,
    pub resources: Vec<usize>,
    pub param_count: usize,
}

/// Canonical shape descriptor of a job: everything but parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobShape {
    pub num_resources: usize,
    pub operations: Vec<OpShape>,
}

impl JobShape {
    pub fn of(job: &JobDescription) -> Self {
        Self {
            num_resources: job.num_resources,
            operations: job
                .operations
                .iter()
                .map(|op| OpShape {
                    kind: op.kind,
                    resources: op.resources.clone(),
                    param_count: op.params.len(),
                })
                .collect(),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.operations.iter().map(|op| op.param_count).sum()
    }

    /// Injective text encoding: `n<resources>` then `;<kind>[r,r,..]#<params>`
    /// per operation. Kind names never contain the delimiters, so two
    /// different shapes can never encode to the same string.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut key = format!("n{}", self.num_resources);
        for op in &self.operations {
            key.push(';');
            key.push_str(op.kind.as_str());
            key.push('[');
            for (index, resource) in op.resources.iter().enumerate() {
                if index > 0 {
                    key.push(',');
                }
                let _ = write!(key, "{}", resource);
            }
            let _ = write!(key, "]#{}", op.param_count);
        }
        Fingerprint(key)
    }
}

/// Cache key for a structural shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    pub fn abbreviated(&self) -> String {
        const MAX: usize = 48;
        match self.0.char_indices().nth(MAX) {
            Some((cut, _)) => format!("{}..({} chars)", &self.0[..cut], self.0.len()),
            None => self.0.clone(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(job: &JobDescription) -> Fingerprint {
    JobShape::of(job).fingerprint()
}
