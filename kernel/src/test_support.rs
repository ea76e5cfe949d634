//! Builders shared by this crate's tests and by downstream test suites.

use crate::ast::{Core, Literal, PrimOp, Var};
use syntax::{Scope, ScopeSet, SrcLoc, Syntax};

pub fn loc() -> SrcLoc {
    SrcLoc::synthetic()
}

pub fn id(name: &str) -> Syntax {
    Syntax::id(name, ScopeSet::empty(), loc())
}

pub fn id_sc(name: &str, scopes: &[Scope]) -> Syntax {
    Syntax::id(name, scopes.iter().copied().collect(), loc())
}

pub fn list(items: Vec<Syntax>) -> Syntax {
    Syntax::list(items, ScopeSet::empty(), loc())
}

pub fn vector(items: Vec<Syntax>) -> Syntax {
    Syntax::vector(items, ScopeSet::empty(), loc())
}

pub fn sig(n: u64) -> Syntax {
    Syntax::new(syntax::SyntaxKind::Sig(n), ScopeSet::empty(), loc())
}

pub fn boolean(b: bool) -> Syntax {
    Syntax::new(syntax::SyntaxKind::Bool(b), ScopeSet::empty(), loc())
}

pub fn string(s: &str) -> Syntax {
    Syntax::new(
        syntax::SyntaxKind::Str(s.to_string()),
        ScopeSet::empty(),
        loc(),
    )
}

pub fn lam(param: u64, body: Core) -> Core {
    Core::lam(Var(param), body)
}

pub fn app(fun: Core, arg: Core) -> Core {
    Core::app(fun, arg)
}

pub fn refer(v: u64) -> Core {
    Core::reference(Var(v))
}

pub fn lit_sig(n: u64) -> Core {
    Core::lit(Literal::Sig(n))
}

pub fn quote(s: Syntax) -> Core {
    Core::quote(s)
}

pub fn prim(p: PrimOp) -> Core {
    Core::prim(p)
}
