//! Concrete runtime values bound to graph inputs and produced by compiled functions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::types::{DType, TensorType, Type};

/// Dense row-major tensor kept on the host.
///
/// Elements are stored as `f64` regardless of dtype; the dtype tag records what the
/// values represent and [`DType::coerce`] keeps them representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Arc<[f64]>,
}

impl HostTensor {
    /// Constructs a tensor, validating the payload length against the shape.
    pub fn from_vec(dtype: DType, shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(GraphError::InvalidInput {
                name: "tensor".to_string(),
                message: format!(
                    "data length ({}) does not match shape {:?}",
                    data.len(),
                    shape
                ),
            });
        }
        Ok(Self {
            dtype,
            shape,
            data: Arc::from(data),
        })
    }

    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
            data: Arc::from(vec![value]),
        }
    }

    /// Tensor of the given shape with every element equal to `value`.
    pub fn full(dtype: DType, shape: Vec<usize>, value: f64) -> Self {
        let len = shape.iter().product();
        Self {
            dtype,
            shape,
            data: Arc::from(vec![value; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the single element of a one-element tensor.
    pub fn to_scalar(&self) -> Option<f64> {
        (self.data.len() == 1).then(|| self.data[0])
    }
}

/// A value flowing through a compiled function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(HostTensor),
    /// Seed-like state of a random stream; each draw yields the next state.
    RandomState(u64),
}

impl Value {
    pub fn scalar(value: f64) -> Self {
        Value::Tensor(HostTensor::scalar(DType::Float64, value))
    }

    /// Float64 tensor from a shape and row-major data.
    pub fn tensor(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        HostTensor::from_vec(DType::Float64, shape, data).map(Value::Tensor)
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            Value::RandomState(_) => None,
        }
    }

    /// Returns the single element of a one-element tensor value.
    pub fn to_scalar(&self) -> Option<f64> {
        self.as_tensor().and_then(HostTensor::to_scalar)
    }

    /// Narrowest type that describes this value (axes of length one are broadcastable).
    pub fn infer_type(&self) -> Type {
        match self {
            Value::Tensor(tensor) => {
                Type::Tensor(TensorType::for_shape(tensor.dtype(), tensor.shape()))
            }
            Value::RandomState(_) => Type::RandomState,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::RandomState(_) => "random state",
        }
    }
}

impl From<HostTensor> for Value {
    fn from(value: HostTensor) -> Self {
        Value::Tensor(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Tensor(tensor) if tensor.rank() == 0 => write!(f, "{}", tensor.data()[0]),
            Value::Tensor(tensor) => write!(f, "{:?}{:?}", tensor.shape(), tensor.data()),
            Value::RandomState(state) => write!(f, "rng({state})"),
        }
    }
}
