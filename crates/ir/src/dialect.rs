//! Parameterized job dialect definitions.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    H,
    X,
    Cx,
    Rx,
    Ry,
    Rz,
    Rzz,
    Crz,
    U3,
    Barrier,
    Measure,
}

/// How many resources an operation kind acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn admits(&self, count: usize) -> bool {
        match *self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::H => "h",
            OpKind::X => "x",
            OpKind::Cx => "cx",
            OpKind::Rx => "rx",
            OpKind::Ry => "ry",
            OpKind::Rz => "rz",
            OpKind::Rzz => "rzz",
            OpKind::Crz => "crz",
            OpKind::U3 => "u3",
            OpKind::Barrier => "barrier",
            OpKind::Measure => "measure",
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            OpKind::Rx | OpKind::Ry | OpKind::Rz | OpKind::Rzz | OpKind::Crz => 1,
            OpKind::U3 => 3,
            OpKind::H | OpKind::X | OpKind::Cx | OpKind::Barrier | OpKind::Measure => 0,
        }
    }

    pub fn resource_arity(&self) -> Arity {
        match self {
            OpKind::Cx | OpKind::Rzz | OpKind::Crz => Arity::Exactly(2),
            OpKind::Barrier => Arity::AtLeast(1),
            _ => Arity::Exactly(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub resources: Vec<usize>,
    pub params: Vec<f64>,
}

impl Operation {
    pub fn new(kind: OpKind, resources: Vec<usize>, params: Vec<f64>) -> Self {
        Self {
            kind,
            resources,
            params,
        }
    }

    pub fn validate(&self, num_resources: usize) -> Result<()> {
        if !self.kind.resource_arity().admits(self.resources.len()) {
            bail!(
                "operation {} acts on {} resources, expected {:?}",
                self.kind.as_str(),
                self.resources.len(),
                self.kind.resource_arity()
            );
        }
        if self.params.len() != self.kind.param_count() {
            bail!(
                "operation {} carries {} parameters, expected {}",
                self.kind.as_str(),
                self.params.len(),
                self.kind.param_count()
            );
        }
        if let Some(index) = self.resources.iter().find(|&&r| r >= num_resources) {
            bail!(
                "operation {} touches resource {} but the job declares {}",
                self.kind.as_str(),
                index,
                num_resources
            );
        }
        Ok(())
    }
}

/// A parameterized job: an ordered list of operations over `num_resources`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescription {
    pub name: String,
    pub num_resources: usize,
    pub operations: Vec<Operation>,
}

impl JobDescription {
    pub fn validate(&self) -> Result<()> {
        for (index, op) in self.operations.iter().enumerate() {
            if let Err(err) = op.validate(self.num_resources) {
                bail!("job {} operation #{}: {}", self.name, index, err);
            }
        }
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        self.operations.iter().map(|op| op.params.len()).sum()
    }

    /// Parameters flattened in operation order.
    pub fn parameters(&self) -> Vec<f64> {
        self.operations
            .iter()
            .flat_map(|op| op.params.iter().copied())
            .collect()
    }

    /// `(operation index, parameter index within the operation)` for every
    /// flattened parameter.
    pub fn parameter_owners(&self) -> Vec<(usize, usize)> {
        self.operations
            .iter()
            .enumerate()
            .flat_map(|(op_index, op)| (0..op.params.len()).map(move |p| (op_index, p)))
            .collect()
    }

    /// Copy of this job with its parameters rebound, in flattened order.
    pub fn with_parameters(&self, values: &[f64]) -> Result<Self> {
        if values.len() != self.num_parameters() {
            bail!(
                "job {} expects {} parameters, got {}",
                self.name,
                self.num_parameters(),
                values.len()
            );
        }
        let mut job = self.clone();
        let mut cursor = values.iter();
        for op in job.operations.iter_mut() {
            for param in op.params.iter_mut() {
                if let Some(value) = cursor.next() {
                    *param = *value;
                }
            }
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobDescription {
        JobDescription {
            name: "sample".into(),
            num_resources: 2,
            operations: vec![
                Operation::new(OpKind::U3, vec![0], vec![0.1, 0.2, 0.3]),
                Operation::new(OpKind::Cx, vec![0, 1], vec![]),
                Operation::new(OpKind::Ry, vec![1], vec![0.4]),
            ],
        }
    }

    #[test]
    fn parameters_flatten_in_operation_order() {
        let job = sample();
        assert_eq!(job.parameters(), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(
            job.parameter_owners(),
            vec![(0, 0), (0, 1), (0, 2), (2, 0)]
        );
    }

    #[test]
    fn rebinding_keeps_structure() {
        let job = sample();
        let rebound = job.with_parameters(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(rebound.parameters(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rebound.operations[1], job.operations[1]);
        assert!(job.with_parameters(&[1.0]).is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_resources() {
        let mut job = sample();
        job.operations[2].resources = vec![5];
        assert!(job.validate().is_err());
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validation_rejects_wrong_param_arity() {
        let mut job = sample();
        job.operations[0].params.pop();
        assert!(job.validate().is_err());
    }
}
