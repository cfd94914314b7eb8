//! Host evaluation of every built-in Op.
//!
//! These are reference semantics, not kernels: device-specialized Ops and
//! transfers evaluate through the same code on host memory.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::error::{GraphError, Result};
use crate::types::{DType, Type};
use crate::value::{HostTensor, Value};

use super::{Distribution, ElemwiseOp, Op, RandomSpec};

/// Numpy-style broadcast of two shapes (aligned on trailing axes).
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for (axis, slot) in out.iter_mut().enumerate() {
        let da = dim_from_right(a, rank, axis);
        let db = dim_from_right(b, rank, axis);
        *slot = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn dim_from_right(shape: &[usize], rank: usize, axis: usize) -> usize {
    let offset = rank - shape.len();
    if axis < offset {
        1
    } else {
        shape[axis - offset]
    }
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Materializes `tensor` broadcast to `shape`, or `None` if incompatible.
fn broadcast_data(tensor: &HostTensor, shape: &[usize]) -> Option<Vec<f64>> {
    let src_shape = tensor.shape();
    if src_shape.len() > shape.len() {
        return None;
    }
    let offset = shape.len() - src_shape.len();
    for (axis, &dim) in src_shape.iter().enumerate() {
        if dim != 1 && dim != shape[axis + offset] {
            return None;
        }
    }
    if src_shape == shape {
        return Some(tensor.data().to_vec());
    }

    let out_strides = strides(shape);
    let src_strides = strides(src_shape);
    let len: usize = shape.iter().product();
    let data = tensor.data();
    let mut out = Vec::with_capacity(len);
    for flat in 0..len {
        let mut src_index = 0;
        for (axis, &dim) in src_shape.iter().enumerate() {
            if dim == 1 {
                continue;
            }
            let coord = (flat / out_strides[axis + offset]) % shape[axis + offset];
            src_index += coord * src_strides[axis];
        }
        out.push(data[src_index]);
    }
    Some(out)
}

fn finish(dtype: DType, shape: Vec<usize>, data: Vec<f64>) -> Result<Value> {
    let data = match dtype {
        DType::Float32 => data.into_iter().map(|x| x as f32 as f64).collect(),
        _ => data,
    };
    HostTensor::from_vec(dtype, shape, data).map(Value::Tensor)
}

impl Op {
    /// Evaluates the Op on concrete host values.
    pub fn perform(&self, inputs: &[Value]) -> Result<Vec<Value>> {
        match self {
            Op::Elemwise(op) => self.perform_elemwise(*op, inputs).map(|v| vec![v]),
            Op::Sum { axes, keepdims } => {
                let [x] = self.tensor_args::<1>(inputs)?;
                Ok(vec![sum(x, axes, *keepdims)?])
            }
            Op::ExpandDims { axes } => {
                let [x] = self.tensor_args::<1>(inputs)?;
                let out_rank = x.rank() + axes.len();
                let mut source = x.shape().iter();
                let shape = (0..out_rank)
                    .map(|axis| {
                        if axes.contains(&axis) {
                            1
                        } else {
                            source.next().copied().unwrap_or(1)
                        }
                    })
                    .collect();
                Ok(vec![finish(x.dtype(), shape, x.data().to_vec())?])
            }
            Op::BroadcastLike => {
                let [value, target] = self.tensor_args::<2>(inputs)?;
                let data = broadcast_data(value, target.shape()).ok_or_else(|| {
                    self.failure(format!(
                        "shape {:?} does not broadcast to {:?}",
                        value.shape(),
                        target.shape()
                    ))
                })?;
                Ok(vec![finish(value.dtype(), target.shape().to_vec(), data)?])
            }
            Op::Fill { value } => {
                let [x] = self.tensor_args::<1>(inputs)?;
                Ok(vec![Value::Tensor(HostTensor::full(
                    x.dtype(),
                    x.shape().to_vec(),
                    *value,
                ))])
            }
            Op::Dot => {
                let [a, b] = self.tensor_args::<2>(inputs)?;
                Ok(vec![self.dot(a, b)?])
            }
            Op::Transpose => {
                let [x] = self.tensor_args::<1>(inputs)?;
                Ok(vec![transpose(x)?])
            }
            Op::Random(spec) => match inputs {
                [Value::RandomState(state)] => sample(spec, *state),
                _ => Err(self.failure("expects a single random state")),
            },
            Op::Transfer(_) => match inputs {
                [value] => Ok(vec![value.clone()]),
                _ => Err(self.failure("expects a single operand")),
            },
            Op::OnDevice { op, .. } => op.perform(inputs),
            Op::Custom(custom) => custom.implementation().perform(inputs),
        }
    }

    /// Rejects values whose length-1 axes would be stretched although their
    /// declared type does not flag them broadcastable.
    ///
    /// `types[i]` is the declared type of `inputs[i]`. Shape errors the op
    /// itself reports are left to [`Op::perform`].
    pub fn check_broadcast(&self, inputs: &[Value], types: &[Type]) -> Result<()> {
        let (stretched, shape) = match self {
            Op::OnDevice { op, .. } => return op.check_broadcast(inputs, types),
            Op::Elemwise(op) if op.arity() == 2 => {
                let [a, b] = self.tensor_args::<2>(inputs)?;
                match broadcast_shapes(a.shape(), b.shape()) {
                    Some(shape) => (2, shape),
                    None => return Ok(()),
                }
            }
            Op::BroadcastLike => {
                let [_, target] = self.tensor_args::<2>(inputs)?;
                (1, target.shape().to_vec())
            }
            _ => return Ok(()),
        };

        for (position, (value, ty)) in inputs.iter().zip(types).take(stretched).enumerate() {
            let (Some(tensor), Some(tt)) = (value.as_tensor(), ty.tensor()) else {
                continue;
            };
            let Some(offset) = shape.len().checked_sub(tensor.rank()) else {
                continue;
            };
            for (axis, &dim) in tensor.shape().iter().enumerate() {
                let flagged = tt.broadcastable.get(axis).copied().unwrap_or(false);
                let target = shape[axis + offset];
                if dim == 1 && target > 1 && !flagged {
                    return Err(self.failure(format!(
                        "operand {position} has length 1 on axis {axis}, which {tt} does not \
                         declare broadcastable, but the result has length {target}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn failure(&self, message: impl Into<String>) -> GraphError {
        GraphError::execution(self.to_string(), message)
    }

    fn tensor_args<'a, const N: usize>(&self, inputs: &'a [Value]) -> Result<[&'a HostTensor; N]> {
        if inputs.len() != N {
            return Err(self.failure(format!("expected {N} operand(s), got {}", inputs.len())));
        }
        let tensors = inputs
            .iter()
            .map(|value| {
                value
                    .as_tensor()
                    .ok_or_else(|| self.failure(format!("expected a tensor, got {}", value.kind_name())))
            })
            .collect::<Result<Vec<_>>>()?;
        tensors
            .try_into()
            .map_err(|_| self.failure("operand count changed"))
    }

    fn perform_elemwise(&self, op: ElemwiseOp, inputs: &[Value]) -> Result<Value> {
        match op.arity() {
            1 => {
                let [x] = self.tensor_args::<1>(inputs)?;
                let data = x.data().iter().map(|&v| op.eval_unary(v)).collect();
                finish(x.dtype(), x.shape().to_vec(), data)
            }
            _ => {
                let [a, b] = self.tensor_args::<2>(inputs)?;
                let shape = broadcast_shapes(a.shape(), b.shape()).ok_or_else(|| {
                    self.failure(format!(
                        "shapes {:?} and {:?} do not broadcast",
                        a.shape(),
                        b.shape()
                    ))
                })?;
                let lhs = broadcast_data(a, &shape).ok_or_else(|| self.failure("lhs broadcast"))?;
                let rhs = broadcast_data(b, &shape).ok_or_else(|| self.failure("rhs broadcast"))?;
                let data = lhs
                    .iter()
                    .zip(&rhs)
                    .map(|(&x, &y)| op.eval_binary(x, y))
                    .collect();
                finish(a.dtype(), shape, data)
            }
        }
    }

    fn dot(&self, a: &HostTensor, b: &HostTensor) -> Result<Value> {
        let (&[m, k], &[k2, n]) = (a.shape(), b.shape()) else {
            return Err(self.failure("expects two matrices"));
        };
        if k != k2 {
            return Err(self.failure(format!(
                "inner dimensions differ ({:?} x {:?})",
                a.shape(),
                b.shape()
            )));
        }
        let (lhs, rhs) = (a.data(), b.data());
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let scale = lhs[i * k + p];
                for j in 0..n {
                    out[i * n + j] += scale * rhs[p * n + j];
                }
            }
        }
        finish(a.dtype(), vec![m, n], out)
    }
}

fn sum(x: &HostTensor, axes: &[usize], keepdims: bool) -> Result<Value> {
    let kept_shape: Vec<usize> = x
        .shape()
        .iter()
        .enumerate()
        .map(|(axis, &dim)| if axes.contains(&axis) { 1 } else { dim })
        .collect();
    let in_strides = strides(x.shape());
    let out_strides = strides(&kept_shape);
    let mut out = vec![0.0; kept_shape.iter().product()];
    for (flat, &value) in x.data().iter().enumerate() {
        let mut target = 0;
        for axis in 0..x.rank() {
            if axes.contains(&axis) {
                continue;
            }
            let coord = (flat / in_strides[axis]) % x.shape()[axis];
            target += coord * out_strides[axis];
        }
        out[target] += value;
    }
    let shape = if keepdims {
        kept_shape
    } else {
        x.shape()
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &dim)| dim)
            .collect()
    };
    finish(x.dtype(), shape, out)
}

fn transpose(x: &HostTensor) -> Result<Value> {
    let shape: Vec<usize> = x.shape().iter().rev().copied().collect();
    let in_strides = strides(x.shape());
    let out_strides = strides(&shape);
    let rank = x.rank();
    let mut out = vec![0.0; x.len()];
    for (flat, &value) in x.data().iter().enumerate() {
        let mut target = 0;
        for axis in 0..rank {
            let coord = (flat / in_strides[axis]) % x.shape()[axis];
            target += coord * out_strides[rank - 1 - axis];
        }
        out[target] = value;
    }
    finish(x.dtype(), shape, out)
}

fn sample(spec: &RandomSpec, state: u64) -> Result<Vec<Value>> {
    let mut rng = StdRng::seed_from_u64(state);
    let len: usize = spec.shape.iter().product();
    let data = match spec.distribution {
        Distribution::Uniform { low, high } => (0..len)
            .map(|_| low + (high - low) * rng.gen::<f64>())
            .collect(),
        Distribution::Normal { mean, std } => {
            let mut values = Vec::with_capacity(len);
            while values.len() < len {
                let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let u2: f64 = rng.gen::<f64>();
                let r = (-2.0 * u1.ln()).sqrt();
                let theta = 2.0 * std::f64::consts::PI * u2;
                values.push(mean + std * r * theta.cos());
                if values.len() < len {
                    values.push(mean + std * r * theta.sin());
                }
            }
            values
        }
    };
    let next_state = rng.next_u64();
    Ok(vec![
        Value::RandomState(next_state),
        finish(spec.dtype, spec.shape.clone(), data)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TensorType;

    fn tensor(shape: &[usize], data: &[f64]) -> Value {
        Value::tensor(shape.to_vec(), data.to_vec()).unwrap()
    }

    #[test]
    fn broadcast_shapes_follow_trailing_alignment() {
        assert_eq!(broadcast_shapes(&[2, 3], &[3]), Some(vec![2, 3]));
        assert_eq!(broadcast_shapes(&[2, 1], &[1, 4]), Some(vec![2, 4]));
        assert_eq!(broadcast_shapes(&[], &[5]), Some(vec![5]));
        assert_eq!(broadcast_shapes(&[2], &[3]), None);
    }

    #[test]
    fn binary_elemwise_broadcasts_rows() {
        let out = Op::add()
            .perform(&[tensor(&[2, 2], &[1.0, 2.0, 3.0, 4.0]), tensor(&[2], &[10.0, 20.0])])
            .unwrap();
        assert_eq!(out[0], tensor(&[2, 2], &[11.0, 22.0, 13.0, 24.0]));
    }

    #[test]
    fn undeclared_broadcast_is_rejected() {
        let row = tensor(&[1, 2], &[1.0, 2.0]);
        let block = tensor(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let inputs = [row, block];

        let matrix = Type::from(TensorType::matrix(DType::Float64));
        let err = Op::mul()
            .check_broadcast(&inputs, &[matrix.clone(), matrix.clone()])
            .unwrap_err();
        assert!(matches!(err, GraphError::Execution { .. }));

        let row_type = Type::from(TensorType::new(DType::Float64, vec![true, false]));
        Op::mul().check_broadcast(&inputs, &[row_type, matrix]).unwrap();
    }

    #[test]
    fn sum_reduces_selected_axes() {
        let x = tensor(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rows = Op::Sum { axes: vec![1], keepdims: false }
            .perform(std::slice::from_ref(&x))
            .unwrap();
        assert_eq!(rows[0], tensor(&[2], &[6.0, 15.0]));
        let cols = Op::Sum { axes: vec![0], keepdims: true }
            .perform(&[x])
            .unwrap();
        assert_eq!(cols[0], tensor(&[1, 3], &[5.0, 7.0, 9.0]));
    }

    #[test]
    fn dot_and_transpose() {
        let a = tensor(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = Op::Transpose.perform(std::slice::from_ref(&a)).unwrap();
        assert_eq!(t[0], tensor(&[3, 2], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]));
        let product = Op::Dot.perform(&[a, t[0].clone()]).unwrap();
        assert_eq!(product[0], tensor(&[2, 2], &[14.0, 32.0, 32.0, 77.0]));
    }

    #[test]
    fn random_draw_is_a_function_of_state() {
        let op = Op::Random(RandomSpec {
            distribution: Distribution::Normal { mean: 0.0, std: 1.0 },
            shape: vec![3],
            dtype: DType::Float64,
        });
        let first = op.perform(&[Value::RandomState(7)]).unwrap();
        let again = op.perform(&[Value::RandomState(7)]).unwrap();
        assert_eq!(first, again);
        assert_ne!(first[0], Value::RandomState(7));
    }
}
