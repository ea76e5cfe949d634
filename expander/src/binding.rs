//! The binding table: identifier text to `(scope set, binding)` pairs,
//! and the best-match resolution rule.

use crate::errors::ExpansionErr;
use std::collections::HashMap;
use std::fmt;
use syntax::{ScopeSet, Syntax};

/// Opaque token for a named thing; paired with an expander value in the
/// expansion environment. Unique within one expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Binding(pub u64);

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identifier text -> ordered candidate list. Only ever grows during one
/// expansion; `add` prepends, so newer bindings sit in front of older
/// ones with the same text.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: HashMap<String, Vec<(ScopeSet, Binding)>>,
}

impl BindingTable {
    pub fn new() -> Self {
        BindingTable::default()
    }

    pub fn add(&mut self, name: &str, scopes: ScopeSet, binding: Binding) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .insert(0, (scopes, binding));
    }

    /// All candidates for `name` whose scope set is a subset of `scopes`.
    pub fn matching(&self, name: &str, scopes: &ScopeSet) -> Vec<(&ScopeSet, Binding)> {
        match self.entries.get(name) {
            None => Vec::new(),
            Some(entries) => entries
                .iter()
                .filter(|(set, _)| set.is_subset_of(scopes))
                .map(|(set, binding)| (set, *binding))
                .collect(),
        }
    }

    /// Resolve an identifier occurrence to a binding.
    ///
    /// The candidate whose scope set has maximum cardinality wins; a tie
    /// at the maximum is ambiguous by construction, and no candidate at
    /// all means the identifier is unknown.
    pub fn resolve(&self, stx: &Syntax) -> Result<Binding, ExpansionErr> {
        let ident = stx.as_ident().ok_or_else(|| ExpansionErr::NotIdentifier {
            loc: stx.loc.clone(),
        })?;
        let candidates = self.matching(&ident.name, &ident.scopes);
        let best = match candidates.iter().max_by_key(|(set, _)| set.size()) {
            Some(best) => *best,
            None => {
                return Err(ExpansionErr::Unknown {
                    name: ident.name,
                    scopes: ident.scopes,
                    loc: ident.loc,
                })
            }
        };
        let ties = candidates
            .iter()
            .filter(|(set, _)| set.size() == best.0.size())
            .count();
        if ties > 1 {
            return Err(ExpansionErr::Ambiguous {
                name: ident.name,
                loc: ident.loc,
            });
        }
        Ok(best.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syntax::{Scope, SrcLoc};

    fn ident(name: &str, scopes: &[Scope]) -> Syntax {
        Syntax::id(name, scopes.iter().copied().collect(), SrcLoc::synthetic())
    }

    #[test]
    fn more_specific_binding_wins() {
        let mut table = BindingTable::new();
        table.add("x", ScopeSet::empty(), Binding(0));
        table.add("x", ScopeSet::singleton(Scope(1)), Binding(1));
        let reference = ident("x", &[Scope(1), Scope(2)]);
        assert_eq!(table.resolve(&reference), Ok(Binding(1)));
    }

    #[test]
    fn tie_at_maximum_is_ambiguous() {
        let mut table = BindingTable::new();
        table.add("x", ScopeSet::singleton(Scope(1)), Binding(0));
        table.add("x", ScopeSet::singleton(Scope(2)), Binding(1));
        let reference = ident("x", &[Scope(1), Scope(2)]);
        assert!(matches!(
            table.resolve(&reference),
            Err(ExpansionErr::Ambiguous { .. })
        ));
    }

    #[test]
    fn non_subset_candidates_are_invisible() {
        let mut table = BindingTable::new();
        table.add("x", ScopeSet::singleton(Scope(5)), Binding(0));
        let reference = ident("x", &[Scope(1)]);
        assert!(matches!(
            table.resolve(&reference),
            Err(ExpansionErr::Unknown { .. })
        ));
    }

    #[test]
    fn non_identifier_is_rejected() {
        let table = BindingTable::new();
        let not_ident = Syntax::list(vec![], ScopeSet::empty(), SrcLoc::synthetic());
        assert!(matches!(
            table.resolve(&not_ident),
            Err(ExpansionErr::NotIdentifier { .. })
        ));
    }
}
