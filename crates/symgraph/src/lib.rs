//! Symbolic expression graphs.
//!
//! Build a [`Graph`] of typed Variables and Op applications, differentiate it
//! with [`grad`], and [`compile`] a region of it: the optimizer rewrites a
//! private copy and the result is lowered to a reusable plan.
//!
//! ```
//! use symgraph::{compile, ops::functional as F, CompileOptions, Graph, Value};
//!
//! let mut graph = Graph::default();
//! let x = graph.scalar("x");
//! let y = graph.scalar("y");
//! let product = F::mul(&mut graph, x, y)?;
//! let out = F::div(&mut graph, product, y)?;
//!
//! let function = compile(&graph, &[x, y], &[out], CompileOptions::default())?;
//! let values = function.call(&[Value::scalar(3.0), Value::scalar(5.0)])?;
//! assert_eq!(values[0].to_scalar(), Some(3.0));
//! # Ok::<(), symgraph::GraphError>(())
//! ```

pub mod autodiff;
pub mod compile;
pub mod config;
mod env;
pub mod error;
pub mod graph;
pub mod ops;
pub mod optimizer;
pub mod printing;
pub mod random;
pub mod shared;
pub mod types;
pub mod value;

pub use autodiff::{grad, grad_with, Disconnected, GradOptions};
pub use compile::{compile, CompileOptions, CompiledGraph, Function, KernelHandle, KernelRegistry};
pub use config::{Config, Device, FloatX, OptimizerMode};
pub use error::{ConfigError, GraphError, Result};
pub use graph::{ApplyId, FunctionGraph, Graph, GraphView, VarId};
pub use ops::{CustomOp, Op, OpImpl};
pub use printing::debug_print;
pub use random::RandomStreams;
pub use shared::SharedVariable;
pub use types::{DType, Location, TensorType, Type};
pub use value::{HostTensor, Value};
