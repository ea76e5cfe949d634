pub mod ast;
pub mod eval;
pub mod graph;
pub mod test_support;

pub use ast::{Core, CoreShape, Literal, NodeId, PartialTree, PrimOp, Var};
pub use eval::{Continuation, Effects, EvalError, MacroOutcome, Signal, Value};
pub use graph::{NodeIdGen, PartialCoreGraph};
