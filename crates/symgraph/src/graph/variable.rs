use crate::shared::SharedVariable;
use crate::types::Type;
use crate::value::Value;

use super::{ApplyId, VarId};

/// Back-reference from an output Variable to the Apply that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    pub apply: ApplyId,
    /// Position among the Apply's outputs.
    pub index: usize,
}

/// Where a Variable's value comes from.
#[derive(Debug, Clone)]
pub enum VariableKind {
    /// Placeholder bound by the caller of a compiled function.
    Input,
    /// Value fixed at graph construction time.
    Constant(Value),
    /// Root whose value lives in storage shared across compiled functions.
    Shared(SharedVariable),
    /// Output of an Apply.
    Computed,
}

/// A symbolic value: a typed node whose owner, if any, is fixed at creation.
#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) id: VarId,
    pub(crate) name: Option<String>,
    pub(crate) ty: Type,
    pub(crate) owner: Option<Owner>,
    pub(crate) kind: VariableKind,
}

impl Variable {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn owner(&self) -> Option<Owner> {
        self.owner
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    /// Ownerless variables are the roots of a graph.
    pub fn is_root(&self) -> bool {
        self.owner.is_none()
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            VariableKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn shared(&self) -> Option<&SharedVariable> {
        match &self.kind {
            VariableKind::Shared(shared) => Some(shared),
            _ => None,
        }
    }

    /// Name used in diagnostics: the user-given name or the id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}
