use crate::scopes::{Scope, ScopeSet};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Source location info. Carried for diagnostics only; it never
/// participates in syntax equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SrcLoc {
    pub file: Arc<str>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl SrcLoc {
    pub fn new(file: Arc<str>, start: (u32, u32), end: (u32, u32)) -> Self {
        SrcLoc {
            file,
            start_line: start.0,
            start_col: start.1,
            end_line: end.0,
            end_col: end.1,
        }
    }

    /// A location for syntax fabricated by the expander or by tests.
    pub fn synthetic() -> Self {
        SrcLoc {
            file: Arc::from("<synthetic>"),
            start_line: 0,
            start_col: 0,
            end_line: 0,
            end_col: 0,
        }
    }
}

impl fmt::Display for SrcLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.start_line, self.start_col)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SyntaxKind {
    Id(String),
    /// A natural-number signal literal.
    Sig(u64),
    Bool(bool),
    Str(String),
    /// Parenthesized sequence.
    List(Vec<Syntax>),
    /// Bracketed sequence.
    Vec(Vec<Syntax>),
}

/// A syntax object: a payload tagged with the scope set that governs
/// binding resolution and the source location it was read from.
/// Syntax objects are immutable; operations return new trees and may
/// share unchanged children.
#[derive(Debug, Clone, Serialize)]
pub struct Syntax {
    pub scopes: ScopeSet,
    pub loc: SrcLoc,
    pub kind: SyntaxKind,
}

// Equality deliberately ignores `loc`.
impl PartialEq for Syntax {
    fn eq(&self, other: &Self) -> bool {
        self.scopes == other.scopes && self.kind == other.kind
    }
}

/// An identifier occurrence destructured out of a syntax object.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub scopes: ScopeSet,
    pub loc: SrcLoc,
}

impl Syntax {
    pub fn new(kind: SyntaxKind, scopes: ScopeSet, loc: SrcLoc) -> Self {
        Syntax { scopes, loc, kind }
    }

    pub fn id(name: impl Into<String>, scopes: ScopeSet, loc: SrcLoc) -> Self {
        Syntax::new(SyntaxKind::Id(name.into()), scopes, loc)
    }

    pub fn list(items: Vec<Syntax>, scopes: ScopeSet, loc: SrcLoc) -> Self {
        Syntax::new(SyntaxKind::List(items), scopes, loc)
    }

    pub fn vector(items: Vec<Syntax>, scopes: ScopeSet, loc: SrcLoc) -> Self {
        Syntax::new(SyntaxKind::Vec(items), scopes, loc)
    }

    pub fn id_name(&self) -> Option<&str> {
        match &self.kind {
            SyntaxKind::Id(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_ident(&self) -> Option<Ident> {
        match &self.kind {
            SyntaxKind::Id(name) => Some(Ident {
                name: name.clone(),
                scopes: self.scopes.clone(),
                loc: self.loc.clone(),
            }),
            _ => None,
        }
    }

    /// Apply a scope-set transformation to every node of the tree.
    pub fn adjust_scopes(&self, f: &impl Fn(&ScopeSet) -> ScopeSet) -> Syntax {
        let kind = match &self.kind {
            SyntaxKind::List(items) => {
                SyntaxKind::List(items.iter().map(|s| s.adjust_scopes(f)).collect())
            }
            SyntaxKind::Vec(items) => {
                SyntaxKind::Vec(items.iter().map(|s| s.adjust_scopes(f)).collect())
            }
            other => other.clone(),
        };
        Syntax {
            scopes: f(&self.scopes),
            loc: self.loc.clone(),
            kind,
        }
    }

    pub fn add_scope(&self, scope: Scope) -> Syntax {
        self.adjust_scopes(&|set| set.insert(scope))
    }

    pub fn remove_scope(&self, scope: Scope) -> Syntax {
        self.adjust_scopes(&|set| set.remove(scope))
    }

    pub fn flip_scope(&self, scope: Scope) -> Syntax {
        self.adjust_scopes(&|set| set.flip(scope))
    }

    pub fn pretty_print(&self) -> String {
        match &self.kind {
            SyntaxKind::List(items) => {
                let inner: Vec<String> = items.iter().map(|s| s.pretty_print()).collect();
                format!("({})", inner.join(" "))
            }
            SyntaxKind::Vec(items) => {
                let inner: Vec<String> = items.iter().map(|s| s.pretty_print()).collect();
                format!("[{}]", inner.join(" "))
            }
            SyntaxKind::Id(name) => name.clone(),
            SyntaxKind::Sig(n) => n.to_string(),
            SyntaxKind::Bool(true) => "#t".to_string(),
            SyntaxKind::Bool(false) => "#f".to_string(),
            SyntaxKind::Str(s) => format!("{:?}", s),
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty_print())
    }
}
