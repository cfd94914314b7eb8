use smallvec::SmallVec;

use crate::ops::Op;

use super::{ApplyId, VarId};

pub(crate) type VarList = SmallVec<[VarId; 4]>;

/// One application of an [`Op`] to ordered inputs, producing ordered outputs.
///
/// The outputs are created together with the Apply and point back at it through
/// their [`Owner`](super::Owner); an Apply is never edited after construction.
#[derive(Debug, Clone)]
pub struct Apply {
    pub(crate) id: ApplyId,
    pub(crate) op: Op,
    pub(crate) inputs: VarList,
    pub(crate) outputs: VarList,
}

impl Apply {
    pub fn id(&self) -> ApplyId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn output(&self, index: usize) -> Option<VarId> {
        self.outputs.get(index).copied()
    }
}
