use crate::error::{GraphError, Result};
use crate::types::{DType, Location, TensorType, Type};

use super::{Distribution, ElemwiseOp, Op, Transfer};

impl Op {
    /// Computes output types for the given input types, or explains why the
    /// inputs are not acceptable.
    pub fn infer_types(&self, inputs: &[Type]) -> Result<Vec<Type>> {
        match self {
            Op::Elemwise(op) => infer_elemwise(*op, inputs).map(|tt| vec![tt.into()]),
            Op::Sum { axes, keepdims } => {
                let [x] = self.tensors::<1>(inputs)?;
                let axes = self.check_axes(axes, x.rank())?;
                let broadcastable = if *keepdims {
                    x.broadcastable
                        .iter()
                        .enumerate()
                        .map(|(axis, &b)| b || axes.contains(&axis))
                        .collect()
                } else {
                    x.broadcastable
                        .iter()
                        .enumerate()
                        .filter(|(axis, _)| !axes.contains(axis))
                        .map(|(_, &b)| b)
                        .collect()
                };
                Ok(vec![relocated(x.dtype, broadcastable, x.location)])
            }
            Op::ExpandDims { axes } => {
                let [x] = self.tensors::<1>(inputs)?;
                let out_rank = x.rank() + axes.len();
                let axes = self.check_axes(axes, out_rank)?;
                let mut source = x.broadcastable.iter();
                let broadcastable = (0..out_rank)
                    .map(|axis| axes.contains(&axis) || source.next().copied().unwrap_or(true))
                    .collect();
                Ok(vec![relocated(x.dtype, broadcastable, x.location)])
            }
            Op::BroadcastLike => {
                let [value, target] = self.tensors::<2>(inputs)?;
                if value.rank() > target.rank() {
                    return Err(self.mismatch(format!(
                        "cannot broadcast rank {} to rank {}",
                        value.rank(),
                        target.rank()
                    )));
                }
                self.same_location(&[value, target])?;
                Ok(vec![relocated(
                    value.dtype,
                    target.broadcastable.clone(),
                    target.location,
                )])
            }
            Op::Fill { value } => {
                let [x] = self.tensors::<1>(inputs)?;
                if x.dtype.coerce(*value).is_none() {
                    return Err(self.mismatch(format!("{value} cannot be stored as {}", x.dtype)));
                }
                Ok(vec![x.clone().into()])
            }
            Op::Dot => {
                let [a, b] = self.tensors::<2>(inputs)?;
                if a.rank() != 2 || b.rank() != 2 {
                    return Err(self.mismatch(format!(
                        "expected two matrices, got ranks {} and {}",
                        a.rank(),
                        b.rank()
                    )));
                }
                self.same_dtype(&[a, b])?;
                self.same_location(&[a, b])?;
                Ok(vec![relocated(
                    a.dtype,
                    vec![a.broadcastable[0], b.broadcastable[1]],
                    a.location,
                )])
            }
            Op::Transpose => {
                let [x] = self.tensors::<1>(inputs)?;
                let broadcastable = x.broadcastable.iter().rev().copied().collect();
                Ok(vec![relocated(x.dtype, broadcastable, x.location)])
            }
            Op::Random(spec) => {
                if inputs.len() != 1 || inputs[0] != Type::RandomState {
                    return Err(self.mismatch("expects a single random state input"));
                }
                if !spec.dtype.is_float() {
                    return Err(self.mismatch(format!("cannot sample {}", spec.dtype)));
                }
                if let Distribution::Uniform { low, high } = spec.distribution {
                    if low > high {
                        return Err(self.mismatch(format!("empty interval [{low}, {high})")));
                    }
                }
                Ok(vec![
                    Type::RandomState,
                    TensorType::for_shape(spec.dtype, &spec.shape).into(),
                ])
            }
            Op::Transfer(transfer) => {
                let [x] = self.tensors::<1>(inputs)?;
                match (transfer, x.location) {
                    (Transfer::ToDevice(n), Location::Host) => {
                        Ok(vec![x.clone().with_location(Location::Device(*n)).into()])
                    }
                    (Transfer::ToHost, Location::Device(_)) => {
                        Ok(vec![x.clone().with_location(Location::Host).into()])
                    }
                    (_, location) => {
                        Err(self.mismatch(format!("operand already lives on {location}")))
                    }
                }
            }
            Op::OnDevice { device, op } => {
                if matches!(**op, Op::OnDevice { .. } | Op::Transfer(_)) {
                    return Err(self.mismatch("cannot specialize a transfer"));
                }
                let location = Location::Device(*device);
                let mut host_inputs = Vec::with_capacity(inputs.len());
                for ty in inputs {
                    match ty {
                        Type::Tensor(tt) if tt.location == location => {
                            host_inputs.push(tt.clone().with_location(Location::Host).into())
                        }
                        Type::Tensor(tt) => {
                            return Err(self.mismatch(format!(
                                "operand lives on {}, expected {location}",
                                tt.location
                            )))
                        }
                        Type::RandomState => host_inputs.push(Type::RandomState),
                    }
                }
                let outputs = op.infer_types(&host_inputs)?;
                Ok(outputs
                    .into_iter()
                    .map(|ty| match ty {
                        Type::Tensor(tt) => tt.with_location(location).into(),
                        other => other,
                    })
                    .collect())
            }
            Op::Custom(custom) => custom.implementation().infer_types(inputs),
        }
    }

    fn mismatch(&self, message: impl Into<String>) -> GraphError {
        GraphError::type_mismatch(self.to_string(), message)
    }

    fn tensors<'a, const N: usize>(&self, inputs: &'a [Type]) -> Result<[&'a TensorType; N]> {
        if inputs.len() != N {
            return Err(self.mismatch(format!(
                "expected {N} operand(s), got {}",
                inputs.len()
            )));
        }
        let tensors = inputs
            .iter()
            .map(|ty| {
                ty.tensor()
                    .ok_or_else(|| self.mismatch(format!("expected a tensor operand, got {ty}")))
            })
            .collect::<Result<Vec<_>>>()?;
        tensors
            .try_into()
            .map_err(|_| self.mismatch("operand count changed"))
    }

    fn check_axes(&self, axes: &[usize], rank: usize) -> Result<Vec<usize>> {
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != axes.len() {
            return Err(self.mismatch(format!("repeated axis in {axes:?}")));
        }
        if let Some(&axis) = sorted.iter().find(|&&axis| axis >= rank) {
            return Err(self.mismatch(format!("axis {axis} out of range for rank {rank}")));
        }
        Ok(sorted)
    }

    fn same_dtype(&self, tensors: &[&TensorType]) -> Result<()> {
        let first = tensors[0].dtype;
        match tensors.iter().find(|tt| tt.dtype != first) {
            Some(other) => Err(self.mismatch(format!(
                "operand dtypes differ ({first} vs {})",
                other.dtype
            ))),
            None => Ok(()),
        }
    }

    fn same_location(&self, tensors: &[&TensorType]) -> Result<()> {
        let first = tensors[0].location;
        match tensors.iter().find(|tt| tt.location != first) {
            Some(other) => Err(self.mismatch(format!(
                "operands live on different devices ({first} vs {})",
                other.location
            ))),
            None => Ok(()),
        }
    }
}

fn relocated(dtype: DType, broadcastable: Vec<bool>, location: Location) -> Type {
    TensorType::new(dtype, broadcastable)
        .with_location(location)
        .into()
}

fn infer_elemwise(op: ElemwiseOp, inputs: &[Type]) -> Result<TensorType> {
    let wrapped = Op::Elemwise(op);
    if inputs.len() != op.arity() {
        return Err(wrapped.mismatch(format!(
            "expected {} operand(s), got {}",
            op.arity(),
            inputs.len()
        )));
    }
    let mut tensors = Vec::with_capacity(inputs.len());
    for ty in inputs {
        tensors.push(
            ty.tensor()
                .ok_or_else(|| wrapped.mismatch(format!("expected a tensor operand, got {ty}")))?,
        );
    }
    wrapped.same_dtype(&tensors)?;
    wrapped.same_location(&tensors)?;

    let dtype = tensors[0].dtype;
    if dtype == DType::Bool {
        return Err(wrapped.mismatch("arithmetic is not defined on bool"));
    }
    if op.requires_float() && !dtype.is_float() {
        return Err(wrapped.mismatch(format!("requires a float dtype, got {dtype}")));
    }

    let rank = tensors.iter().map(|tt| tt.rank()).max().unwrap_or(0);
    let broadcastable = (0..rank)
        .map(|axis| {
            tensors.iter().all(|tt| {
                let offset = rank - tt.rank();
                axis < offset || tt.broadcastable[axis - offset]
            })
        })
        .collect::<Vec<_>>();

    Ok(TensorType::new(dtype, broadcastable).with_location(tensors[0].location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::RandomSpec;

    fn t(broadcastable: &[bool]) -> Type {
        TensorType::new(DType::Float64, broadcastable.to_vec()).into()
    }

    #[test]
    fn elemwise_broadcasts_leading_and_unit_axes() {
        let out = Op::mul().infer_types(&[t(&[]), t(&[false, true])]).unwrap();
        assert_eq!(out, vec![t(&[false, true])]);

        let out = Op::add().infer_types(&[t(&[true, false]), t(&[false, true])]).unwrap();
        assert_eq!(out, vec![t(&[false, false])]);
    }

    #[test]
    fn sum_drops_or_keeps_axes() {
        let x = t(&[false, false, false]);
        let dropped = Op::Sum { axes: vec![0, 2], keepdims: false }
            .infer_types(std::slice::from_ref(&x))
            .unwrap();
        assert_eq!(dropped, vec![t(&[false])]);
        let kept = Op::Sum { axes: vec![1], keepdims: true }
            .infer_types(&[x])
            .unwrap();
        assert_eq!(kept, vec![t(&[false, true, false])]);
    }

    #[test]
    fn expand_dims_inserts_broadcastable_axes() {
        let out = Op::ExpandDims { axes: vec![0, 2] }
            .infer_types(&[t(&[false])])
            .unwrap();
        assert_eq!(out, vec![t(&[true, false, true])]);
    }

    #[test]
    fn integer_division_is_rejected() {
        let i = Type::from(TensorType::scalar(DType::Int64));
        let err = Op::div().infer_types(&[i.clone(), i]).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
    }

    #[test]
    fn bool_arithmetic_is_rejected() {
        let b = Type::from(TensorType::scalar(DType::Bool));
        for op in [Op::add(), Op::sub(), Op::mul()] {
            let err = op.infer_types(&[b.clone(), b.clone()]).unwrap_err();
            assert!(matches!(err, GraphError::TypeMismatch { .. }), "{op} accepted bool");
        }
        let err = Op::Elemwise(ElemwiseOp::Neg).infer_types(&[b]).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));

        let i = Type::from(TensorType::scalar(DType::Int64));
        assert!(Op::add().infer_types(&[i.clone(), i]).is_ok());
    }

    #[test]
    fn transfers_move_between_host_and_device() {
        let host = t(&[false]);
        let on_device = Op::Transfer(Transfer::ToDevice(1))
            .infer_types(std::slice::from_ref(&host))
            .unwrap();
        assert_eq!(
            on_device,
            vec![Type::from(
                TensorType::vector(DType::Float64).with_location(Location::Device(1))
            )]
        );
        assert!(Op::Transfer(Transfer::ToHost).infer_types(&[host]).is_err());
    }

    #[test]
    fn random_draw_yields_state_and_sample() {
        let op = Op::Random(RandomSpec {
            distribution: Distribution::Uniform { low: 0.0, high: 1.0 },
            shape: vec![2, 1],
            dtype: DType::Float32,
        });
        let out = op.infer_types(&[Type::RandomState]).unwrap();
        assert_eq!(out[0], Type::RandomState);
        assert_eq!(out[1], TensorType::new(DType::Float32, vec![false, true]).into());
    }
}
