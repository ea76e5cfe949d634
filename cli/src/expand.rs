use expander::diagnostics::{Diagnostic, DiagnosticCollector};
use expander::{ExpandedDecl, Expander, ExpansionErr};
use kernel::graph::PartialCoreGraph;
use syntax::reader::{ReadError, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandMode {
    Expression,
    Declaration,
    Module,
}

fn note(diagnostics: &mut DiagnosticCollector, err: &ExpansionErr) {
    diagnostics.push(Diagnostic::from_expansion_err(err));
}

fn render_decl(decl: &ExpandedDecl) -> String {
    match decl {
        ExpandedDecl::Define { name, graph, .. } => match graph.to_core() {
            Some(core) => format!("(define {} {})", name, core),
            None => format!("(define {} _)", name),
        },
        ExpandedDecl::DefineSyntax { name, .. } => format!("(define-syntax {})", name),
        ExpandedDecl::Expr { graph } => render_graph(graph),
    }
}

fn render_graph(graph: &PartialCoreGraph) -> String {
    match graph.to_core() {
        Some(core) => core.to_string(),
        None => graph.zonk().to_string(),
    }
}

/// Expand `input` and pretty-print the resulting core, one line per
/// top-level form. A form that fails to expand is reported into
/// `diagnostics` and skipped, so later forms still get their turn; only
/// unreadable input aborts.
pub fn expand_source(
    input: &str,
    filename: &str,
    expander: &mut Expander,
    mode: ExpandMode,
    diagnostics: &mut DiagnosticCollector,
) -> Result<String, ReadError> {
    let mut output = Vec::new();
    match mode {
        ExpandMode::Module => {
            let module = Reader::new(input, filename).read_module()?;
            match expander.module_items(&module.body) {
                Err(err) => note(diagnostics, &err),
                Ok(items) => {
                    for item in items {
                        match expander.expand_declaration(item) {
                            Ok(decl) => output.push(render_decl(&decl)),
                            Err(err) => note(diagnostics, &err),
                        }
                    }
                }
            }
        }
        ExpandMode::Declaration => {
            let forms = Reader::new(input, filename).read_all()?;
            for form in forms {
                match expander.expand_declaration(form) {
                    Ok(decl) => output.push(render_decl(&decl)),
                    Err(err) => note(diagnostics, &err),
                }
            }
        }
        ExpandMode::Expression => {
            let forms = Reader::new(input, filename).read_all()?;
            for form in forms {
                match expander.expand_expression(form) {
                    Ok(graph) => output.push(render_graph(&graph)),
                    Err(err) => note(diagnostics, &err),
                }
            }
        }
    }
    Ok(output.join("\n"))
}

/// Expand `input` and dump the partial core graphs as JSON. Failing
/// forms are reported into `diagnostics` and left out of the dump.
pub fn expand_source_json(
    input: &str,
    filename: &str,
    expander: &mut Expander,
    diagnostics: &mut DiagnosticCollector,
) -> Result<String, ReadError> {
    let forms = Reader::new(input, filename).read_all()?;
    let mut graphs = Vec::new();
    for form in forms {
        match expander.expand_expression(form) {
            Ok(graph) => graphs.push(graph),
            Err(err) => note(diagnostics, &err),
        }
    }
    Ok(serde_json::to_string_pretty(&graphs).expect("graphs serialize"))
}

/// Format the macro-use trace the way the REPL and `--trace` show it.
pub fn format_trace(trace: &[(String, syntax::SrcLoc)]) -> String {
    trace
        .iter()
        .map(|(name, loc)| format!("  {} at {}", name, loc))
        .collect::<Vec<_>>()
        .join("\n")
}
