use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Scope identifier (for hygiene). Scopes are opaque: only equality and
/// ordering are meaningful, and fresh scopes come from the expander's
/// monotone counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Scope(pub u64);

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sc{}", self.0)
    }
}

/// A finite set of scopes attached to a syntax object.
///
/// Scope sets are value-typed: every operation is pure and returns a new
/// set. Equality is structural. The resolver relies on `is_subset_of` and
/// on `size` (cardinality) only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScopeSet {
    scopes: BTreeSet<Scope>,
}

impl ScopeSet {
    pub fn empty() -> Self {
        ScopeSet::default()
    }

    pub fn singleton(scope: Scope) -> Self {
        let mut scopes = BTreeSet::new();
        scopes.insert(scope);
        ScopeSet { scopes }
    }

    pub fn insert(&self, scope: Scope) -> Self {
        let mut scopes = self.scopes.clone();
        scopes.insert(scope);
        ScopeSet { scopes }
    }

    pub fn remove(&self, scope: Scope) -> Self {
        let mut scopes = self.scopes.clone();
        scopes.remove(&scope);
        ScopeSet { scopes }
    }

    /// Toggle membership of `scope`.
    pub fn flip(&self, scope: Scope) -> Self {
        if self.contains(scope) {
            self.remove(scope)
        } else {
            self.insert(scope)
        }
    }

    pub fn union(&self, other: &ScopeSet) -> Self {
        ScopeSet {
            scopes: self.scopes.union(&other.scopes).copied().collect(),
        }
    }

    pub fn intersection(&self, other: &ScopeSet) -> Self {
        ScopeSet {
            scopes: self.scopes.intersection(&other.scopes).copied().collect(),
        }
    }

    pub fn is_subset_of(&self, other: &ScopeSet) -> bool {
        self.scopes.is_subset(&other.scopes)
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn size(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.scopes.iter().copied()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        ScopeSet {
            scopes: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, sc) in self.scopes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", sc)?;
        }
        write!(f, "}}")
    }
}
