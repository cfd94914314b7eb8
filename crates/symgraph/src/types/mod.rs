//! Type descriptors: element kinds, tensor dimensionality, and memory location.

mod dtype;
mod ty;

pub use dtype::DType;
pub use ty::{Location, TensorType, Type};
