//! Phases, expander values, and the phase-indexed expansion environment.

use crate::binding::Binding;
use crate::expander::Prim;
use kernel::ast::PartialTree;
use kernel::eval::Value;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A phase level: 0 is runtime, `n + 1` is the world `n` levels of macro
/// definitions above. Signed so shifts stay total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Phase(pub i32);

impl Phase {
    pub const RUNTIME: Phase = Phase(0);

    /// The phase of this phase's transformers.
    pub fn up(self) -> Phase {
        self.shift(1)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {}", self.0)
    }
}

/// Values carrying phase levels can be shifted wholesale.
pub trait ShiftPhase: Sized {
    fn shift(self, offset: i32) -> Self;
}

impl ShiftPhase for Phase {
    fn shift(self, offset: i32) -> Phase {
        Phase(self.0 + offset)
    }
}

/// Where a macro may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyntacticCategory {
    Module,
    Declaration,
    Expression,
}

impl fmt::Display for SyntacticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntacticCategory::Module => write!(f, "module"),
            SyntacticCategory::Declaration => write!(f, "declaration"),
            SyntacticCategory::Expression => write!(f, "expression"),
        }
    }
}

/// What a binding means to the expander.
#[derive(Debug, Clone)]
pub enum EValue {
    /// A built-in special form.
    PrimMacro(Prim),
    /// A bound variable; its reference shape is a ready core fragment.
    VarMacro(PartialTree),
    /// A user-defined macro: a first-class transformer in the core
    /// language, gated by the category of the context it may run in.
    UserMacro {
        category: SyntacticCategory,
        transformer: Value,
    },
}

/// A phase-indexed mapping from bindings to expander values. An absent
/// phase is equivalent to an empty one.
#[derive(Debug, Clone, Default)]
pub struct ExpansionEnv {
    phases: HashMap<Phase, HashMap<Binding, EValue>>,
}

impl ExpansionEnv {
    pub fn new() -> Self {
        ExpansionEnv::default()
    }

    pub fn lookup(&self, phase: Phase, binding: Binding) -> Option<&EValue> {
        self.phases.get(&phase)?.get(&binding)
    }

    pub fn extend(&mut self, phase: Phase, binding: Binding, value: EValue) {
        self.phases.entry(phase).or_default().insert(binding, value);
    }
}

impl ShiftPhase for ExpansionEnv {
    /// Rename every phase `p` to `p + offset`.
    fn shift(self, offset: i32) -> ExpansionEnv {
        ExpansionEnv {
            phases: self
                .phases
                .into_iter()
                .map(|(phase, bindings)| (phase.shift(offset), bindings))
                .collect(),
        }
    }
}
