//! Kernel registry: maps op kinds to named per-device implementations.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::config::Device;
use crate::error::{GraphError, Result};
use crate::ops::{ElemwiseOp, Op, Transfer};

/// Resolved implementation name of one scheduled node, e.g. `cpu.add`,
/// `gpu0.dot` or `transfer.h2d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct KernelHandle(String);

impl KernelHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const ELEMWISE: [ElemwiseOp; 10] = [
    ElemwiseOp::Add,
    ElemwiseOp::Sub,
    ElemwiseOp::Mul,
    ElemwiseOp::Div,
    ElemwiseOp::Pow,
    ElemwiseOp::Neg,
    ElemwiseOp::Exp,
    ElemwiseOp::Log,
    ElemwiseOp::Tanh,
    ElemwiseOp::Round,
];

const STRUCTURAL: [&str; 6] = ["sum", "expand_dims", "broadcast_like", "fill", "dot", "transpose"];

const HOST_ONLY: [&str; 2] = ["random_uniform", "random_normal"];

/// Per-device kernel table.
///
/// Every built-in kind has a host kernel. Accelerators get the elementwise and
/// structural families for any ordinal; random draws stay on the host. Entries
/// added with [`KernelRegistry::register`] take precedence over the built-ins.
#[derive(Debug, Clone)]
pub struct KernelRegistry {
    device_kinds: HashSet<String>,
    host_kinds: HashSet<String>,
    registered: HashMap<(String, Device), KernelHandle>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl KernelRegistry {
    /// A registry without any built-in kernel.
    pub fn empty() -> Self {
        Self {
            device_kinds: HashSet::new(),
            host_kinds: HashSet::new(),
            registered: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let device_kinds = ELEMWISE
            .iter()
            .map(|op| op.name())
            .chain(STRUCTURAL.iter().copied());
        for kind in device_kinds {
            registry.device_kinds.insert(kind.to_string());
            registry.host_kinds.insert(kind.to_string());
        }
        registry
            .host_kinds
            .extend(HOST_ONLY.iter().map(|kind| kind.to_string()));
        registry
    }

    /// Adds (or overrides) the kernel of `kind` on `device`.
    pub fn register(&mut self, kind: &str, device: Device, handle: impl Into<String>) -> &mut Self {
        self.registered
            .insert((kind.to_string(), device), KernelHandle::new(handle));
        self
    }

    /// Op kinds with a kernel on `device`.
    pub fn kinds_for(&self, device: Device) -> HashSet<String> {
        let mut kinds = match device {
            Device::Cpu => self.host_kinds.clone(),
            Device::Gpu(_) => self.device_kinds.clone(),
        };
        kinds.extend(
            self.registered
                .keys()
                .filter(|(_, registered)| *registered == device)
                .map(|(kind, _)| kind.clone()),
        );
        kinds
    }

    pub fn lookup(&self, kind: &str, device: Device) -> Option<KernelHandle> {
        if let Some(handle) = self.registered.get(&(kind.to_string(), device)) {
            return Some(handle.clone());
        }
        let builtin = match device {
            Device::Cpu => &self.host_kinds,
            Device::Gpu(_) => &self.device_kinds,
        };
        builtin
            .contains(kind)
            .then(|| KernelHandle::new(format!("{device}.{kind}")))
    }

    /// Kernel that executes `op` in a compiled plan.
    ///
    /// Host Applies of custom ops fall back to `cpu.<name>`, which runs the
    /// op's own `perform`.
    pub fn resolve(&self, op: &Op) -> Result<KernelHandle> {
        match op {
            Op::Transfer(Transfer::ToDevice(_)) => Ok(KernelHandle::new("transfer.h2d")),
            Op::Transfer(Transfer::ToHost) => Ok(KernelHandle::new("transfer.d2h")),
            Op::OnDevice { device, op } => {
                let target = Device::Gpu(*device);
                let kind = op.kind();
                if let Some(handle) = self.lookup(&kind, target) {
                    return Ok(handle);
                }
                if let Op::Custom(custom) = op.as_ref() {
                    if let Some(name) = custom.implementation().device_kernel(*device) {
                        return Ok(KernelHandle::new(name));
                    }
                }
                Err(GraphError::execution(
                    kind,
                    format!("no kernel registered for {target}"),
                ))
            }
            Op::Custom(custom) => Ok(self
                .lookup(custom.name(), Device::Cpu)
                .unwrap_or_else(|| KernelHandle::new(format!("cpu.{}", custom.name())))),
            other => {
                let kind = other.kind();
                self.lookup(&kind, Device::Cpu).ok_or_else(|| {
                    GraphError::execution(kind, "no host kernel registered".to_string())
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_handles_follow_device_naming() {
        let registry = KernelRegistry::default();
        assert_eq!(registry.resolve(&Op::add()).unwrap().name(), "cpu.add");
        let on_device = Op::OnDevice {
            device: 1,
            op: Box::new(Op::Dot),
        };
        assert_eq!(registry.resolve(&on_device).unwrap().name(), "gpu1.dot");
        assert_eq!(
            registry
                .resolve(&Op::Transfer(Transfer::ToDevice(1)))
                .unwrap()
                .name(),
            "transfer.h2d"
        );
    }

    #[test]
    fn random_draws_have_no_device_kernel() {
        let registry = KernelRegistry::default();
        let gpu = registry.kinds_for(Device::Gpu(0));
        assert!(gpu.contains("mul"));
        assert!(!gpu.contains("random_normal"));
        assert!(registry.kinds_for(Device::Cpu).contains("random_normal"));
    }

    #[test]
    fn registered_kernels_override_builtins() {
        let mut registry = KernelRegistry::empty();
        registry.register("exp", Device::Gpu(0), "gpu0.fast_exp");
        let on_device = Op::OnDevice {
            device: 0,
            op: Box::new(Op::Elemwise(ElemwiseOp::Exp)),
        };
        assert_eq!(registry.resolve(&on_device).unwrap().name(), "gpu0.fast_exp");
        assert!(registry.kinds_for(Device::Gpu(0)).contains("exp"));
        assert!(!registry.kinds_for(Device::Gpu(1)).contains("exp"));
        assert!(registry.resolve(&Op::add()).is_err());
    }
}
