//! Type descriptors attached to every symbolic variable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{HostTensor, Value};

use super::DType;

/// Memory space a tensor value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Host,
    /// Accelerator with the given ordinal (`gpu0`, `gpu1`, ...).
    Device(u32),
}

impl Location {
    pub fn is_host(self) -> bool {
        matches!(self, Location::Host)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => f.write_str("host"),
            Location::Device(n) => write!(f, "gpu{n}"),
        }
    }
}

/// Element kind plus dimensionality constraints of a tensor.
///
/// The rank is `broadcastable.len()`. An axis flagged broadcastable is statically
/// known to have length one, which is what lets elementwise ops broadcast it and
/// what the gradient engine uses to contract gradients back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    pub broadcastable: Vec<bool>,
    pub location: Location,
}

impl TensorType {
    pub fn new(dtype: DType, broadcastable: impl Into<Vec<bool>>) -> Self {
        Self {
            dtype,
            broadcastable: broadcastable.into(),
            location: Location::Host,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Vec::new())
    }

    pub fn vector(dtype: DType) -> Self {
        Self::new(dtype, vec![false])
    }

    pub fn matrix(dtype: DType) -> Self {
        Self::new(dtype, vec![false, false])
    }

    /// Tensor type whose broadcastable flags follow a concrete shape.
    pub fn for_shape(dtype: DType, shape: &[usize]) -> Self {
        Self::new(dtype, shape.iter().map(|&d| d == 1).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.broadcastable.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.broadcastable.is_empty()
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Checks a concrete shape against the declared rank and broadcastable axes.
    pub fn accepts_shape(&self, shape: &[usize]) -> bool {
        shape.len() == self.rank()
            && shape
                .iter()
                .zip(&self.broadcastable)
                .all(|(&dim, &bcast)| !bcast || dim == 1)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{}, (", self.dtype)?;
        for (idx, bcast) in self.broadcastable.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(if *bcast { "1" } else { "x" })?;
        }
        f.write_str(")>")?;
        if let Location::Device(n) = self.location {
            write!(f, "@gpu{n}")?;
        }
        Ok(())
    }
}

/// Type of a symbolic variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Tensor(TensorType),
    /// Opaque state of a random generator, threaded through random draws.
    RandomState,
}

impl Type {
    pub fn tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(tt) => Some(tt),
            Type::RandomState => None,
        }
    }

    /// Validates (and where needed converts) a runtime value against this type.
    ///
    /// Float values are rounded to the declared precision; integer and boolean
    /// kinds reject values they cannot represent exactly.
    pub fn filter(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (Type::RandomState, Value::RandomState(state)) => Ok(Value::RandomState(state)),
            (Type::Tensor(tt), Value::Tensor(tensor)) => {
                if !tt.accepts_shape(tensor.shape()) {
                    return Err(format!(
                        "value of shape {:?} does not fit {tt}",
                        tensor.shape()
                    ));
                }
                if tensor.dtype() == tt.dtype {
                    return Ok(Value::Tensor(tensor));
                }
                let mut data = Vec::with_capacity(tensor.len());
                for &x in tensor.data() {
                    let coerced = tt.dtype.coerce(x).ok_or_else(|| {
                        format!("value {x} cannot be stored as {}", tt.dtype)
                    })?;
                    data.push(coerced);
                }
                let converted = HostTensor::from_vec(tt.dtype, tensor.shape().to_vec(), data)
                    .map_err(|err| err.to_string())?;
                Ok(Value::Tensor(converted))
            }
            (ty, value) => Err(format!("{} value does not fit {ty}", value.kind_name())),
        }
    }
}

impl From<TensorType> for Type {
    fn from(value: TensorType) -> Self {
        Type::Tensor(value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tt) => tt.fmt(f),
            Type::RandomState => f.write_str("random_state"),
        }
    }
}
