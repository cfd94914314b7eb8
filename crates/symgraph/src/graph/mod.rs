//! Graph intermediate representation: Variables, Applies, the arena that owns
//! them, and the traversals every later stage is built on.

mod apply;
mod arena;
mod function_graph;
mod ids;
pub mod traversal;
mod variable;

pub use apply::Apply;
pub use arena::Graph;
pub use function_graph::FunctionGraph;
pub use ids::{ApplyId, VarId};
pub use traversal::{ancestors_between, clients, root_variables, toposort, Clients, GraphView};
pub use variable::{Owner, Variable, VariableKind};
