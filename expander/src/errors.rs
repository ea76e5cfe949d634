//! The expansion error taxonomy. Every failure is fatal to the current
//! expansion unit; callers decide what to do next.

use crate::env::SyntacticCategory;
use crate::expander::TaskId;
use kernel::eval::{EvalError, Signal};
use syntax::{ScopeSet, SrcLoc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpansionErr {
    /// The resolver found more than one maximum-size candidate.
    #[error("{loc}: ambiguous reference to `{name}`")]
    Ambiguous { name: String, loc: SrcLoc },
    /// The resolver found no candidate at all.
    #[error("{loc}: unknown identifier `{name}`")]
    Unknown {
        name: String,
        scopes: ScopeSet,
        loc: SrcLoc,
    },
    #[error("{loc}: expected an identifier")]
    NotIdentifier { loc: SrcLoc },
    #[error("{loc}: expected an empty list")]
    NotEmpty { loc: SrcLoc },
    #[error("{loc}: expected a non-empty list")]
    NotCons { loc: SrcLoc },
    #[error("{loc}: expected a vector of length {expected}")]
    NotRightLength { expected: usize, loc: SrcLoc },
    /// A macro's category disagrees with its usage context: `expected`
    /// is what the context allows, `got` what the macro is.
    #[error("{loc}: {got} macro used in {expected} context")]
    WrongCategory {
        expected: SyntacticCategory,
        got: SyntacticCategory,
        loc: SrcLoc,
    },
    /// Every task is blocked and nothing can deliver further signals.
    #[error("expansion is stuck: task {task} is blocked on signal {signal}")]
    StuckExpansion { task: TaskId, signal: Signal },
    /// The core evaluator failed while running a transformer.
    #[error("{loc}: macro evaluation failed: {source}")]
    Eval {
        #[source]
        source: EvalError,
        loc: SrcLoc,
    },
}

impl ExpansionErr {
    /// The offending syntax's location, when there is one.
    pub fn loc(&self) -> Option<&SrcLoc> {
        match self {
            ExpansionErr::Ambiguous { loc, .. }
            | ExpansionErr::Unknown { loc, .. }
            | ExpansionErr::NotIdentifier { loc }
            | ExpansionErr::NotEmpty { loc }
            | ExpansionErr::NotCons { loc }
            | ExpansionErr::NotRightLength { loc, .. }
            | ExpansionErr::WrongCategory { loc, .. }
            | ExpansionErr::Eval { loc, .. } => Some(loc),
            ExpansionErr::StuckExpansion { .. } => None,
        }
    }
}
