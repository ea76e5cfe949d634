//! The narrow interface through which the engine invokes macro
//! transformers. The engine never looks inside a transformer value: it
//! hands the value and the (already scope-flipped) input syntax to the
//! evaluator and stores whatever continuation comes back.

use kernel::eval::{self, Effects, EvalError, MacroOutcome, Value};
use syntax::Syntax;

/// An external evaluator for macro transformers. Must be re-entrant: the
/// engine may hold several suspended continuations simultaneously.
pub trait MacroEvaluator {
    fn apply_macro(
        &mut self,
        transformer: &Value,
        input: Syntax,
        fx: &mut Effects,
    ) -> Result<MacroOutcome, EvalError>;
}

/// The default evaluator: the kernel's core-language interpreter.
#[derive(Debug, Default)]
pub struct CoreEvaluator;

impl MacroEvaluator for CoreEvaluator {
    fn apply_macro(
        &mut self,
        transformer: &Value,
        input: Syntax,
        fx: &mut Effects,
    ) -> Result<MacroOutcome, EvalError> {
        eval::apply_transformer(transformer, input, fx)
    }
}
