//! Enumerates the scalar element kinds a symbolic tensor may hold.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Element kind of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Boolean stored as 0/1.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// Single precision; values are rounded through `f32` after every op.
    Float32,
    /// Double precision, the default `floatX`.
    Float64,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Canonical lowercase name, matching the `floatX` configuration spelling.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Rounds `value` to what this dtype can represent.
    ///
    /// Returns `None` when the value cannot be stored without changing its meaning
    /// (a fractional value into an integer kind, anything but 0/1 into `Bool`).
    pub fn coerce(self, value: f64) -> Option<f64> {
        match self {
            DType::Float64 => Some(value),
            DType::Float32 => Some(value as f32 as f64),
            DType::Int64 => (value.fract() == 0.0 || !value.is_finite()).then_some(value),
            DType::Bool => (value == 0.0 || value == 1.0).then_some(value),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" => Ok(DType::Bool),
            "int64" => Ok(DType::Int64),
            "float32" => Ok(DType::Float32),
            "float64" => Ok(DType::Float64),
            other => Err(format!("unknown dtype `{other}`")),
        }
    }
}
