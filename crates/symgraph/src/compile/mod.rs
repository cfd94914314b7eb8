//! Lowering of optimized graphs to executable plans.
//!
//! [`compile`] copies the requested region into a [`FunctionGraph`],
//! runs the configured optimizer pipeline, and emits a [`CompiledGraph`]:
//! a topological schedule whose nodes carry resolved [`KernelHandle`]s and
//! address values through slots. [`Function`] wraps the plan with argument
//! checking and shared-variable updates.
//!
//! [`FunctionGraph`]: crate::graph::FunctionGraph

mod executor;
mod function;
mod kernels;
mod plan;

pub use executor::execute;
pub use function::{compile, CompileOptions, Function};
pub use kernels::{KernelHandle, KernelRegistry};
pub use plan::{CompiledGraph, ConstantBinding, InputBinding, ScheduledNode, SharedBinding};
