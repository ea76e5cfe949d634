//! Surface tests for the expand entry points the binary and the REPL
//! share.

use cli::expand::{expand_source, expand_source_json, ExpandMode};
use expander::diagnostics::DiagnosticCollector;
use expander::Expander;
use syntax::ReadError;

fn expand_clean(src: &str, mode: ExpandMode) -> String {
    let mut ex = Expander::new();
    let mut diagnostics = DiagnosticCollector::new();
    let out = expand_source(src, "t.stc", &mut ex, mode, &mut diagnostics).expect("read");
    assert!(
        !diagnostics.has_errors(),
        "unexpected diagnostics: {:?}",
        diagnostics.diagnostics
    );
    out
}

// =============================================================================
// MODES
// =============================================================================

#[test]
fn test_expression_mode() {
    assert_eq!(
        expand_clean("(lambda [x] x)", ExpandMode::Expression),
        "(lam local0 local0)"
    );
}

#[test]
fn test_expression_mode_multiple_forms() {
    assert_eq!(expand_clean("1 2", ExpandMode::Expression), "1\n2");
}

#[test]
fn test_module_mode_with_lang_header() {
    assert_eq!(
        expand_clean("#lang stitch\n(define x 1)\nx", ExpandMode::Module),
        "(define x 1)\nlocal0"
    );
}

#[test]
fn test_module_mode_with_macro_definition() {
    assert_eq!(
        expand_clean(
            "(define-syntax second (lambda [stx] (car (cdr stx))))\n(second 5)",
            ExpandMode::Module,
        ),
        "(define-syntax second)\n5"
    );
}

#[test]
fn test_declaration_mode() {
    assert_eq!(
        expand_clean("(define y 2)", ExpandMode::Declaration),
        "(define y 2)"
    );
}

// =============================================================================
// JSON DUMPS
// =============================================================================

#[test]
fn test_json_dump_round_trips_root() {
    let mut ex = Expander::new();
    let mut diagnostics = DiagnosticCollector::new();
    let out = expand_source_json("42", "t.stc", &mut ex, &mut diagnostics).expect("read");
    assert!(!diagnostics.has_errors());
    let parsed: serde_json::Value = serde_json::from_str(&out).expect("valid json");
    let graphs = parsed.as_array().expect("array of graphs");
    assert_eq!(graphs.len(), 1);
    assert!(graphs[0].get("root").is_some());
    assert!(graphs[0].get("nodes").is_some());
}

// =============================================================================
// ERRORS
// =============================================================================

#[test]
fn test_read_errors_abort() {
    let mut ex = Expander::new();
    let mut diagnostics = DiagnosticCollector::new();
    let err = expand_source(
        "(unclosed",
        "t.stc",
        &mut ex,
        ExpandMode::Expression,
        &mut diagnostics,
    )
    .unwrap_err();
    assert!(matches!(err, ReadError::UnexpectedEof { .. }));
    assert!(!diagnostics.has_errors());
}

#[test]
fn test_expansion_errors_are_collected() {
    let mut ex = Expander::new();
    let mut diagnostics = DiagnosticCollector::new();
    let out = expand_source(
        "(nope)",
        "t.stc",
        &mut ex,
        ExpandMode::Expression,
        &mut diagnostics,
    )
    .expect("read");
    assert!(out.is_empty());
    assert!(diagnostics.has_errors());
    let diagnostic = &diagnostics.diagnostics[0];
    assert!(diagnostic.message.contains("nope"));
    assert!(diagnostic.loc.is_some(), "diagnostic should carry a span");
    assert!(!diagnostic.labels.is_empty(), "diagnostic should be labeled");
}

/// One failing form does not keep the rest of the file from expanding.
#[test]
fn test_later_forms_survive_a_failing_one() {
    let mut ex = Expander::new();
    let mut diagnostics = DiagnosticCollector::new();
    let out = expand_source(
        "(nope) 42 (also-nope)",
        "t.stc",
        &mut ex,
        ExpandMode::Expression,
        &mut diagnostics,
    )
    .expect("read");
    assert_eq!(out, "42");
    assert_eq!(diagnostics.diagnostics.len(), 2);
}
