//! End-to-end expansion tests: literals, the built-in special forms,
//! application insertion, and the shape-check errors.

use expander::{Expander, ExpansionErr, Phase};
use insta::assert_snapshot;
use kernel::ast::{Core, CoreShape};
use kernel::graph::PartialCoreGraph;
use syntax::read_all;

fn expand_str(src: &str) -> Result<PartialCoreGraph, ExpansionErr> {
    let mut forms = read_all(src, "test.stc").expect("read");
    assert_eq!(forms.len(), 1, "expected a single form");
    Expander::new().expand_expression(forms.remove(0))
}

fn core_of(src: &str) -> Core {
    let graph = expand_str(src).expect("expansion");
    assert!(graph.is_complete(), "graph has pending holes");
    graph.to_core().expect("complete graph")
}

// =============================================================================
// LITERALS AND ATOMS
// =============================================================================

/// A bare signal literal expands to a core literal with zero tasks left
/// blocked.
#[test]
fn test_expand_signal_literal() {
    assert_snapshot!(core_of("42"), @"42");
}

#[test]
fn test_expand_booleans_and_strings() {
    assert_snapshot!(core_of("#t"), @"#t");
    assert_snapshot!(core_of("\"hi\""), @r#""hi""#);
}

// =============================================================================
// LAMBDA
// =============================================================================

/// `(lambda [x] x)` introduces a fresh scope, binds `x` to a fresh core
/// variable under it, and yields `Lam(v, Ref(v))`.
#[test]
fn test_expand_lambda_identity() {
    assert_snapshot!(core_of("(lambda [x] x)"), @"(lam local0 local0)");
}

#[test]
fn test_lambda_binder_does_not_leak() {
    // The inner binder shadows the outer one under its own scope.
    let core = core_of("(lambda [x] (lambda [x] x))");
    match &core.shape {
        CoreShape::Lam { param: outer, body } => match &body.shape {
            CoreShape::Lam { param: inner, body } => {
                assert_ne!(outer, inner);
                match &body.shape {
                    CoreShape::Ref(v) => assert_eq!(v, inner),
                    other => panic!("Expected Ref, got {:?}", other),
                }
            }
            other => panic!("Expected inner Lam, got {:?}", other),
        },
        other => panic!("Expected Lam, got {:?}", other),
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

/// A list headed by a variable expands as an application.
#[test]
fn test_application_inserted_for_variable_heads() {
    assert_snapshot!(
        core_of("(lambda [f] (f 1 2))"),
        @"(lam local0 ((local0 1) 2))"
    );
}

/// `#%app` can also be written explicitly.
#[test]
fn test_explicit_app() {
    assert_snapshot!(
        core_of("(lambda [f] (#%app f 1))"),
        @"(lam local0 (local0 1))"
    );
}

#[test]
fn test_application_with_non_identifier_head() {
    assert_snapshot!(
        core_of("((lambda [x] x) 7)"),
        @"((lam local0 local0) 7)"
    );
}

// =============================================================================
// QUOTE
// =============================================================================

#[test]
fn test_quote_yields_syntax_literal() {
    assert_snapshot!(core_of("(quote (f x))"), @"(quote (f x))");
}

// =============================================================================
// FAILURES
// =============================================================================

/// Scenario: `(foo)` with `foo` unbound fails with `Unknown`.
#[test]
fn test_unknown_head() {
    assert!(matches!(
        expand_str("(foo)"),
        Err(ExpansionErr::Unknown { ref name, .. }) if name == "foo"
    ));
}

#[test]
fn test_empty_list_is_not_cons() {
    assert!(matches!(
        expand_str("()"),
        Err(ExpansionErr::NotCons { .. })
    ));
}

#[test]
fn test_bare_vector_is_rejected() {
    assert!(matches!(
        expand_str("[1 2]"),
        Err(ExpansionErr::NotCons { .. })
    ));
}

#[test]
fn test_lambda_shape_errors() {
    assert!(matches!(
        expand_str("(lambda)"),
        Err(ExpansionErr::NotCons { .. })
    ));
    assert!(matches!(
        expand_str("(lambda [x y] x)"),
        Err(ExpansionErr::NotRightLength { expected: 1, .. })
    ));
    assert!(matches!(
        expand_str("(lambda [42] x)"),
        Err(ExpansionErr::NotIdentifier { .. })
    ));
    assert!(matches!(
        expand_str("(lambda [x] x x)"),
        Err(ExpansionErr::NotEmpty { .. })
    ));
}

#[test]
fn test_quote_arity() {
    assert!(matches!(
        expand_str("(quote)"),
        Err(ExpansionErr::NotCons { .. })
    ));
    assert!(matches!(
        expand_str("(quote a b)"),
        Err(ExpansionErr::NotEmpty { .. })
    ));
}

/// An identifier bound at phase 0 is invisible to phase-1 transformer
/// expressions.
#[test]
fn test_out_of_phase_reference_is_unknown() {
    assert!(matches!(
        expand_str("(lambda [x] (let-syntax [m x] (m)))"),
        Err(ExpansionErr::Unknown { ref name, .. }) if name == "x"
    ));
}

/// Declarations may not appear in expression context.
#[test]
fn test_define_in_expression_context() {
    let err = expand_str("(lambda [x] (define y 1))").unwrap_err();
    assert!(matches!(err, ExpansionErr::WrongCategory { .. }));
}

// =============================================================================
// GRAPH SHAPE
// =============================================================================

/// The returned graph is a tree: every node id is a child of at most one
/// parent position.
#[test]
fn test_result_graph_is_a_tree() {
    let graph = expand_str("((lambda [f] (f 1)) (lambda [x] x))").expect("expansion");
    let mut seen = std::collections::HashSet::new();
    for shape in graph.nodes.values() {
        for child in shape.children() {
            assert!(seen.insert(*child), "child {} appears twice", child);
        }
    }
    assert!(graph.is_complete());
}

/// Variable references carry no sub-tasks: the var fills its node
/// directly.
#[test]
fn test_variable_reference_shape() {
    let core = core_of("(lambda [x] x)");
    match &core.shape {
        CoreShape::Lam { param, body } => match &body.shape {
            CoreShape::Ref(v) => assert_eq!(v, param),
            other => panic!("Expected Ref, got {:?}", other),
        },
        other => panic!("Expected Lam, got {:?}", other),
    }
}

#[test]
fn test_bind_variable_references_resolve() {
    let mut ex = Expander::new();
    let (_, var) = ex.bind_variable("g", syntax::ScopeSet::empty(), Phase::RUNTIME);
    let mut forms = read_all("(g 3)", "test.stc").expect("read");
    let core = ex
        .expand_expression(forms.remove(0))
        .expect("expansion")
        .to_core()
        .expect("complete");
    match &core.shape {
        CoreShape::App { fun, .. } => match &fun.shape {
            CoreShape::Ref(v) => assert_eq!(*v, var),
            other => panic!("Expected Ref, got {:?}", other),
        },
        other => panic!("Expected App, got {:?}", other),
    }
}
