//! The core-language evaluator that runs macro transformers.
//!
//! A transformer is a core-language value applied to the macro's input
//! syntax. Evaluation either produces a value outright or suspends on a
//! signal: `(wait-signal sig handler)` stops the current transformer and
//! hands the engine a continuation that applies `handler` to the signal
//! once it is delivered. Suspension propagates outward through enclosing
//! applications the way an error would, so a transformer that waits does
//! so for its whole remaining body.

use crate::ast::{Core, CoreShape, Literal, PrimOp, Var};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use syntax::{Syntax, SyntaxKind};
use thiserror::Error;

/// A rendezvous token between suspended expansion tasks and the
/// evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Signal(pub u64);

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unbound core variable {0}")]
    UnboundVariable(Var),
    #[error("`{0}` is not applicable")]
    NotAFunction(String),
    #[error("`{prim}` expects a signal literal")]
    ExpectedSignal { prim: &'static str },
    #[error("`{prim}` expects a syntax object")]
    ExpectedSyntax { prim: &'static str },
    #[error("`{prim}` expects a syntax list")]
    ExpectedSyntaxList { prim: &'static str },
    #[error("`{prim}` applied to an empty syntax list")]
    EmptySyntaxList { prim: &'static str },
    #[error("macro transformer produced a non-syntax value")]
    NonSyntaxResult,
    #[error("transformer blocked on {0} outside a macro invocation")]
    BlockedOutsideMacro(Signal),
}

/// Evaluation environment: core variables to values. Extension is
/// persistent so suspended closures keep the bindings they captured.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: Rc<HashMap<Var, Value>>,
}

impl Env {
    pub fn empty() -> Self {
        Env::default()
    }

    pub fn lookup(&self, var: Var) -> Option<&Value> {
        self.vars.get(&var)
    }

    pub fn extend(&self, var: Var, value: Value) -> Env {
        let mut vars: HashMap<Var, Value> = (*self.vars).clone();
        vars.insert(var, value);
        Env {
            vars: Rc::new(vars),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub param: Var,
    pub body: Core,
    pub env: Env,
}

/// A core-language run-time value.
#[derive(Debug, Clone)]
pub enum Value {
    Closure(Rc<Closure>),
    Syntax(Syntax),
    Literal(Literal),
    /// A primitive together with the arguments applied so far.
    Prim(PrimOp, Vec<Value>),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::Closure(_) => "#<closure>".to_string(),
            Value::Syntax(s) => s.pretty_print(),
            Value::Literal(Literal::Sig(n)) => n.to_string(),
            Value::Literal(Literal::Bool(b)) => if *b { "#t" } else { "#f" }.to_string(),
            Value::Literal(Literal::Str(s)) => format!("{:?}", s),
            Value::Prim(op, _) => format!("#<{}>", op.name()),
        }
    }
}

/// Signals emitted while a transformer ran; the engine routes them to
/// blocked tasks after the invocation returns.
#[derive(Debug, Default)]
pub struct Effects {
    pub sent: Vec<Signal>,
}

/// Result of one evaluation: a value, or a suspension waiting on a
/// signal with the handler to apply when it arrives.
pub enum Step {
    Value(Value),
    Blocked { signal: Signal, handler: Value },
}

/// What a macro invocation came to: the expansion, or a suspension with
/// a re-entrant continuation.
pub enum MacroOutcome {
    Done(Syntax),
    Blocked(Signal, Continuation),
}

/// An opaque callable produced only by the evaluator: applying it to the
/// delivered signal resumes the suspended transformer.
pub struct Continuation(Box<dyn FnOnce(Signal, &mut Effects) -> Result<MacroOutcome, EvalError>>);

impl Continuation {
    pub fn resume(self, signal: Signal, fx: &mut Effects) -> Result<MacroOutcome, EvalError> {
        (self.0)(signal, fx)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<continuation>")
    }
}

pub fn eval(core: &Core, env: &Env, fx: &mut Effects) -> Result<Step, EvalError> {
    match &core.shape {
        CoreShape::Lam { param, body } => Ok(Step::Value(Value::Closure(Rc::new(Closure {
            param: *param,
            body: (**body).clone(),
            env: env.clone(),
        })))),
        CoreShape::Ref(var) => match env.lookup(*var) {
            Some(value) => Ok(Step::Value(value.clone())),
            None => Err(EvalError::UnboundVariable(*var)),
        },
        CoreShape::Lit(l) => Ok(Step::Value(Value::Literal(l.clone()))),
        CoreShape::Quote(s) => Ok(Step::Value(Value::Syntax(s.clone()))),
        CoreShape::Prim(op) => Ok(Step::Value(Value::Prim(*op, Vec::new()))),
        CoreShape::App { fun, arg } => {
            let fun = match eval(fun, env, fx)? {
                Step::Value(v) => v,
                blocked => return Ok(blocked),
            };
            let arg = match eval(arg, env, fx)? {
                Step::Value(v) => v,
                blocked => return Ok(blocked),
            };
            apply(fun, arg, fx)
        }
    }
}

pub fn apply(fun: Value, arg: Value, fx: &mut Effects) -> Result<Step, EvalError> {
    match fun {
        Value::Closure(closure) => {
            let env = closure.env.extend(closure.param, arg);
            eval(&closure.body, &env, fx)
        }
        Value::Prim(op, mut args) => {
            args.push(arg);
            if args.len() == op.arity() {
                apply_prim(op, args, fx)
            } else {
                Ok(Step::Value(Value::Prim(op, args)))
            }
        }
        other => Err(EvalError::NotAFunction(other.describe())),
    }
}

fn apply_prim(op: PrimOp, mut args: Vec<Value>, fx: &mut Effects) -> Result<Step, EvalError> {
    match op {
        PrimOp::Cons => {
            let tail = args.pop().expect("arity checked");
            let head = args.pop().expect("arity checked");
            let head = as_syntax(head, op.name())?;
            let tail = as_syntax(tail, op.name())?;
            let (items, rebuild) = as_sequence(&tail, op.name())?;
            let mut new_items = Vec::with_capacity(items.len() + 1);
            new_items.push(head);
            new_items.extend(items.iter().cloned());
            Ok(Step::Value(Value::Syntax(rebuild(new_items))))
        }
        PrimOp::Car => {
            let stx = as_syntax(args.pop().expect("arity checked"), op.name())?;
            let (items, _) = as_sequence(&stx, op.name())?;
            match items.first() {
                Some(first) => Ok(Step::Value(Value::Syntax(first.clone()))),
                None => Err(EvalError::EmptySyntaxList { prim: op.name() }),
            }
        }
        PrimOp::Cdr => {
            let stx = as_syntax(args.pop().expect("arity checked"), op.name())?;
            let (items, rebuild) = as_sequence(&stx, op.name())?;
            if items.is_empty() {
                return Err(EvalError::EmptySyntaxList { prim: op.name() });
            }
            Ok(Step::Value(Value::Syntax(rebuild(items[1..].to_vec()))))
        }
        PrimOp::SendSignal => {
            let sig = as_signal(args.pop().expect("arity checked"), op.name())?;
            fx.sent.push(sig);
            Ok(Step::Value(Value::Literal(Literal::Sig(sig.0))))
        }
        PrimOp::WaitSignal => {
            let handler = args.pop().expect("arity checked");
            let sig = as_signal(args.pop().expect("arity checked"), op.name())?;
            Ok(Step::Blocked {
                signal: sig,
                handler,
            })
        }
    }
}

fn as_syntax(value: Value, prim: &'static str) -> Result<Syntax, EvalError> {
    match value {
        Value::Syntax(s) => Ok(s),
        _ => Err(EvalError::ExpectedSyntax { prim }),
    }
}

fn as_signal(value: Value, prim: &'static str) -> Result<Signal, EvalError> {
    match value {
        Value::Literal(Literal::Sig(n)) => Ok(Signal(n)),
        _ => Err(EvalError::ExpectedSignal { prim }),
    }
}

type Rebuild<'a> = Box<dyn Fn(Vec<Syntax>) -> Syntax + 'a>;

fn as_sequence<'a>(
    stx: &'a Syntax,
    prim: &'static str,
) -> Result<(&'a [Syntax], Rebuild<'a>), EvalError> {
    match &stx.kind {
        SyntaxKind::List(items) => Ok((
            items,
            Box::new(move |new| Syntax::list(new, stx.scopes.clone(), stx.loc.clone())),
        )),
        SyntaxKind::Vec(items) => Ok((
            items,
            Box::new(move |new| Syntax::vector(new, stx.scopes.clone(), stx.loc.clone())),
        )),
        _ => Err(EvalError::ExpectedSyntaxList { prim }),
    }
}

/// Evaluate a core term all the way to a value; a suspension here is an
/// error because there is no macro invocation to hand the continuation
/// to (used for transformer expressions in `let-syntax` and friends).
pub fn eval_value(core: &Core, env: &Env, fx: &mut Effects) -> Result<Value, EvalError> {
    match eval(core, env, fx)? {
        Step::Value(v) => Ok(v),
        Step::Blocked { signal, .. } => Err(EvalError::BlockedOutsideMacro(signal)),
    }
}

/// Run a macro transformer over its input syntax.
pub fn apply_transformer(
    transformer: &Value,
    input: Syntax,
    fx: &mut Effects,
) -> Result<MacroOutcome, EvalError> {
    let step = apply(transformer.clone(), Value::Syntax(input), fx)?;
    outcome_of(step)
}

fn outcome_of(step: Step) -> Result<MacroOutcome, EvalError> {
    match step {
        Step::Value(Value::Syntax(stx)) => Ok(MacroOutcome::Done(stx)),
        Step::Value(_) => Err(EvalError::NonSyntaxResult),
        Step::Blocked { signal, handler } => Ok(MacroOutcome::Blocked(
            signal,
            Continuation(Box::new(move |delivered, fx| {
                let step = apply(handler, Value::Literal(Literal::Sig(delivered.0)), fx)?;
                outcome_of(step)
            })),
        )),
    }
}
