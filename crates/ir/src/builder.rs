//! Job builder entrypoints and helpers.

use crate::dialect::{JobDescription, OpKind, Operation};

#[derive(Debug, Default, Clone)]
pub struct JobBuilder {
    name: String,
    num_resources: usize,
    operations: Vec<Operation>,
}

impl JobBuilder {
    pub fn new<N: Into<String>>(name: N, num_resources: usize) -> Self {
        Self {
            name: name.into(),
            num_resources,
            operations: Vec::new(),
        }
    }

    pub fn op(mut self, kind: OpKind, resources: &[usize], params: &[f64]) -> Self {
        self.operations
            .push(Operation::new(kind, resources.to_vec(), params.to_vec()));
        self
    }

    pub fn h(self, target: usize) -> Self {
        self.op(OpKind::H, &[target], &[])
    }

    pub fn x(self, target: usize) -> Self {
        self.op(OpKind::X, &[target], &[])
    }

    pub fn cx(self, control: usize, target: usize) -> Self {
        self.op(OpKind::Cx, &[control, target], &[])
    }

    pub fn rx(self, theta: f64, target: usize) -> Self {
        self.op(OpKind::Rx, &[target], &[theta])
    }

    pub fn ry(self, theta: f64, target: usize) -> Self {
        self.op(OpKind::Ry, &[target], &[theta])
    }

    pub fn rz(self, theta: f64, target: usize) -> Self {
        self.op(OpKind::Rz, &[target], &[theta])
    }

    pub fn rzz(self, theta: f64, a: usize, b: usize) -> Self {
        self.op(OpKind::Rzz, &[a, b], &[theta])
    }

    pub fn crz(self, theta: f64, control: usize, target: usize) -> Self {
        self.op(OpKind::Crz, &[control, target], &[theta])
    }

    pub fn u3(self, theta: f64, phi: f64, lambda: f64, target: usize) -> Self {
        self.op(OpKind::U3, &[target], &[theta, phi, lambda])
    }

    pub fn barrier(self, resources: &[usize]) -> Self {
        self.op(OpKind::Barrier, resources, &[])
    }

    pub fn measure(self, target: usize) -> Self {
        self.op(OpKind::Measure, &[target], &[])
    }

    pub fn build(self) -> JobDescription {
        JobDescription {
            name: self.name,
            num_resources: self.num_resources,
            operations: self.operations,
        }
    }
}

impl JobDescription {
    pub fn builder<N: Into<String>>(name: N, num_resources: usize) -> JobBuilder {
        JobBuilder::new(name, num_resources)
    }
}

/// Hardware-efficient ansatz: `depth` layers of `ry`/`rz` rotations on every
/// resource followed by a linear `cx` entangler, then a final rotation layer.
/// Parameters are laid out in the order they are consumed.
pub fn ry_rz_ansatz(num_resources: usize, depth: usize, params: &[f64]) -> JobDescription {
    let mut values = params.iter().copied().chain(std::iter::repeat(0.0));
    let mut builder = JobBuilder::new(format!("ryrz_{}x{}", num_resources, depth), num_resources);
    for layer in 0..=depth {
        for target in 0..num_resources {
            builder = builder
                .ry(values.next().unwrap_or_default(), target)
                .rz(values.next().unwrap_or_default(), target);
        }
        if layer < depth {
            for target in 1..num_resources {
                builder = builder.cx(target - 1, target);
            }
        }
    }
    builder.build()
}

/// Number of parameters consumed by [`ry_rz_ansatz`].
pub fn ry_rz_parameter_count(num_resources: usize, depth: usize) -> usize {
    2 * num_resources * (depth + 1)
}
