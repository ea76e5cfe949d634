//! Declaration and module-body expansion: `define`, `define-syntax`,
//! the `#%module` wrapper, and category gating.

use expander::{ExpandedDecl, Expander, ExpansionErr, Phase, SyntacticCategory};
use kernel::ast::CoreShape;
use kernel::eval::{Effects, Env};
use kernel::test_support::{app, lam, prim, refer};
use syntax::{read_all, ScopeSet};

fn read_forms(src: &str) -> Vec<syntax::Syntax> {
    read_all(src, "test.stc").expect("read")
}

// =============================================================================
// DEFINE
// =============================================================================

#[test]
fn test_define_produces_a_named_graph() {
    let mut ex = Expander::new();
    let mut forms = read_forms("(define answer 42)");
    match ex.expand_declaration(forms.remove(0)).expect("expand") {
        ExpandedDecl::Define { name, graph, .. } => {
            assert_eq!(name, "answer");
            assert_eq!(graph.to_core().expect("complete").to_string(), "42");
        }
        other => panic!("Expected Define, got {:?}", other),
    }
}

#[test]
fn test_later_declarations_see_earlier_definitions() {
    let mut ex = Expander::new();
    let decls = ex
        .expand_module_body(&read_forms("(define one 1) (define same one)"))
        .expect("expand");
    assert_eq!(decls.len(), 2);
    let first_var = match &decls[0] {
        ExpandedDecl::Define { var, .. } => *var,
        other => panic!("Expected Define, got {:?}", other),
    };
    match &decls[1] {
        ExpandedDecl::Define { graph, .. } => {
            let core = graph.to_core().expect("complete");
            match &core.shape {
                CoreShape::Ref(v) => assert_eq!(*v, first_var),
                other => panic!("Expected Ref, got {:?}", other),
            }
        }
        other => panic!("Expected Define, got {:?}", other),
    }
}

#[test]
fn test_expression_form_as_declaration() {
    let mut ex = Expander::new();
    let decls = ex
        .expand_module_body(&read_forms("((lambda [x] x) 7)"))
        .expect("expand");
    match &decls[0] {
        ExpandedDecl::Expr { graph } => {
            assert_eq!(
                graph.to_core().expect("complete").to_string(),
                "((lam local0 local0) 7)"
            );
        }
        other => panic!("Expected Expr, got {:?}", other),
    }
}

// =============================================================================
// DEFINE-SYNTAX
// =============================================================================

#[test]
fn test_define_syntax_then_use() {
    let mut ex = Expander::new();
    let decls = ex
        .expand_module_body(&read_forms(
            "(define-syntax second (lambda [stx] (car (cdr stx))))
             (second 9)",
        ))
        .expect("expand");
    assert_eq!(decls.len(), 2);
    assert!(matches!(
        &decls[0],
        ExpandedDecl::DefineSyntax { name, .. } if name == "second"
    ));
    match &decls[1] {
        ExpandedDecl::Expr { graph } => {
            assert_eq!(graph.to_core().expect("complete").to_string(), "9");
        }
        other => panic!("Expected Expr, got {:?}", other),
    }
}

#[test]
fn test_defined_macro_usable_in_later_expressions() {
    let mut ex = Expander::new();
    ex.expand_module_body(&read_forms(
        "(define-syntax swap (lambda [stx] (cons (car (cdr (cdr stx))) (cons (car (cdr stx)) (quote ())))))",
    ))
    .expect("define");
    let mut forms = read_forms("(swap 1 (lambda [x] x))");
    let graph = ex.expand_expression(forms.remove(0)).expect("expand");
    // local0 went to the transformer's own binder during its phase-1
    // expansion, so the use-site lambda gets local1.
    assert_eq!(
        graph.to_core().expect("complete").to_string(),
        "((lam local1 local1) 1)"
    );
}

// =============================================================================
// MODULE WRAPPER AND MODULE MACROS
// =============================================================================

#[test]
fn test_module_wrapper_unwraps() {
    let mut ex = Expander::new();
    let decls = ex
        .expand_module_body(&read_forms("(#%module (define x 1) x)"))
        .expect("expand");
    assert_eq!(decls.len(), 2);
    assert!(matches!(&decls[0], ExpandedDecl::Define { name, .. } if name == "x"));
    assert!(matches!(&decls[1], ExpandedDecl::Expr { .. }));
}

#[test]
fn test_module_macro_rewrites_whole_body() {
    let mut ex = Expander::new();
    // (lam stx (cons (quote #%module) (cdr stx)))
    let transformer = kernel::eval::eval_value(
        &lam(
            100,
            app(
                app(
                    prim(kernel::ast::PrimOp::Cons),
                    kernel::test_support::quote(kernel::test_support::id("#%module")),
                ),
                app(prim(kernel::ast::PrimOp::Cdr), refer(100)),
            ),
        ),
        &Env::empty(),
        &mut Effects::default(),
    )
    .expect("transformer");
    ex.bind_user_macro(
        "whole-module",
        ScopeSet::empty(),
        SyntacticCategory::Module,
        transformer,
        Phase::RUNTIME,
    );
    let decls = ex
        .expand_module_body(&read_forms("(whole-module (define x 5))"))
        .expect("expand");
    assert_eq!(decls.len(), 1);
    assert!(matches!(&decls[0], ExpandedDecl::Define { name, .. } if name == "x"));
}

// =============================================================================
// CATEGORY GATING
// =============================================================================

#[test]
fn test_module_macro_rejected_in_expression_context() {
    let mut ex = Expander::new();
    let transformer = kernel::eval::eval_value(
        &lam(100, refer(100)),
        &Env::empty(),
        &mut Effects::default(),
    )
    .expect("transformer");
    ex.bind_user_macro(
        "modmac",
        ScopeSet::empty(),
        SyntacticCategory::Module,
        transformer,
        Phase::RUNTIME,
    );
    let mut forms = read_forms("(modmac 1)");
    let err = ex.expand_expression(forms.remove(0)).unwrap_err();
    match err {
        ExpansionErr::WrongCategory { expected, got, .. } => {
            assert_eq!(expected, SyntacticCategory::Expression);
            assert_eq!(got, SyntacticCategory::Module);
        }
        other => panic!("Expected WrongCategory, got {:?}", other),
    }
}

#[test]
fn test_expression_macro_allowed_as_declaration() {
    let mut ex = Expander::new();
    let decls = ex
        .expand_module_body(&read_forms(
            "(define-syntax second (lambda [stx] (car (cdr stx))))
             (second 3)",
        ))
        .expect("expand");
    assert!(matches!(&decls[1], ExpandedDecl::Expr { .. }));
}

#[test]
fn test_module_form_rejected_as_expression() {
    let mut ex = Expander::new();
    let mut forms = read_forms("(lambda [x] (#%module x))");
    let err = ex.expand_expression(forms.remove(0)).unwrap_err();
    assert!(matches!(err, ExpansionErr::WrongCategory { .. }));
}
