//! Shared variables: graph roots whose value lives outside any one call and is
//! visible to (and updatable by) every function compiled against it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{GraphError, Result};
use crate::types::{TensorType, Type};
use crate::value::Value;

static NEXT_SHARED_ID: AtomicU64 = AtomicU64::new(0);

struct SharedInner {
    id: u64,
    name: Option<String>,
    ty: Type,
    value: RwLock<Value>,
}

/// Handle to persistent storage. Clones refer to the same storage.
#[derive(Clone)]
pub struct SharedVariable {
    inner: Arc<SharedInner>,
}

impl SharedVariable {
    /// Creates storage typed after `value`. Tensor axes are not marked
    /// broadcastable, so later values may change every dimension.
    pub fn new(name: Option<&str>, value: Value) -> Self {
        let ty = match &value {
            Value::Tensor(tensor) => {
                TensorType::new(tensor.dtype(), vec![false; tensor.rank()]).into()
            }
            Value::RandomState(_) => Type::RandomState,
        };
        Self::from_parts(name, ty, value)
    }

    /// Creates storage with an explicit type; the initial value must fit it.
    pub fn with_type(name: Option<&str>, ty: Type, value: Value) -> Result<Self> {
        let value = ty.filter(value).map_err(|message| GraphError::InvalidInput {
            name: name.unwrap_or("shared").to_string(),
            message,
        })?;
        Ok(Self::from_parts(name, ty, value))
    }

    fn from_parts(name: Option<&str>, ty: Type, value: Value) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                id: NEXT_SHARED_ID.fetch_add(1, Ordering::Relaxed),
                name: name.map(str::to_string),
                ty,
                value: RwLock::new(value),
            }),
        }
    }

    /// Process-unique identity of the storage.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn ty(&self) -> &Type {
        &self.inner.ty
    }

    pub fn get_value(&self) -> Value {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_value(&self, value: Value) -> Result<()> {
        let value = self
            .inner
            .ty
            .filter(value)
            .map_err(|message| GraphError::InvalidInput {
                name: self.label(),
                message,
            })?;
        *self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    fn label(&self) -> String {
        self.inner
            .name
            .clone()
            .unwrap_or_else(|| format!("shared#{}", self.inner.id))
    }
}

impl fmt::Debug for SharedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVariable")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("ty", &self.inner.ty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;
    use crate::value::HostTensor;

    #[test]
    fn clones_share_storage() {
        let w = SharedVariable::new(Some("w"), Value::scalar(1.0));
        let alias = w.clone();
        alias.set_value(Value::scalar(4.0)).unwrap();
        assert_eq!(w.get_value(), Value::scalar(4.0));
        assert_eq!(w.id(), alias.id());
    }

    #[test]
    fn set_value_checks_type() {
        let w = SharedVariable::new(Some("w"), Value::tensor(vec![2], vec![1.0, 2.0]).unwrap());
        assert!(w.set_value(Value::tensor(vec![3], vec![0.0; 3]).unwrap()).is_ok());
        assert!(w.set_value(Value::scalar(1.0)).is_err());
        assert!(w.set_value(Value::RandomState(3)).is_err());
    }

    #[test]
    fn float32_storage_rounds_incoming_values() {
        let ty: Type = TensorType::scalar(DType::Float32).into();
        let w = SharedVariable::with_type(None, ty, Value::scalar(0.1)).unwrap();
        let stored = w.get_value();
        let tensor = stored.as_tensor().unwrap();
        assert_eq!(tensor.dtype(), DType::Float32);
        assert_eq!(tensor.data()[0], 0.1f32 as f64);
        assert_ne!(Value::Tensor(HostTensor::scalar(DType::Float64, 0.1)), stored);
    }
}
