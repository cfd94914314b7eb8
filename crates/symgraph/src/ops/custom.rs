use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::graph::{Graph, VarId};
use crate::types::Type;
use crate::value::Value;

use super::InputGrad;

/// Behaviour of a user-defined operation.
pub trait OpImpl: Send + Sync + fmt::Debug {
    /// Unique name; doubles as the kernel-family name in the registry.
    fn name(&self) -> &str;

    fn infer_types(&self, inputs: &[Type]) -> Result<Vec<Type>>;

    fn perform(&self, inputs: &[Value]) -> Result<Vec<Value>>;

    /// Builds gradient expressions for every input. `None` means the Op is not
    /// differentiable.
    fn grad(
        &self,
        graph: &mut Graph,
        inputs: &[VarId],
        outputs: &[VarId],
        output_grads: &[Option<VarId>],
    ) -> Result<Option<Vec<InputGrad>>> {
        let _ = (graph, inputs, outputs, output_grads);
        Ok(None)
    }

    /// Pure ops may be merged and constant-folded.
    fn is_pure(&self) -> bool {
        true
    }

    /// Kernel name on accelerator `device`, when the op has one.
    fn device_kernel(&self, device: u32) -> Option<String> {
        let _ = device;
        None
    }
}

/// Shared handle to an [`OpImpl`]. Two handles are equal only when they wrap
/// the same implementation instance.
#[derive(Clone)]
pub struct CustomOp(Arc<dyn OpImpl>);

impl CustomOp {
    pub fn new(op: impl OpImpl + 'static) -> Self {
        Self(Arc::new(op))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn is_pure(&self) -> bool {
        self.0.is_pure()
    }

    pub fn implementation(&self) -> &dyn OpImpl {
        self.0.as_ref()
    }
}

impl fmt::Debug for CustomOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomOp").field(&self.0).finish()
    }
}

impl PartialEq for CustomOp {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Serialize for CustomOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let address = Arc::as_ptr(&self.0) as *const () as usize;
        (self.name(), address).serialize(serializer)
    }
}
