//! Diagnostic rendering: expansion and read errors pointed at their
//! source spans.

use ariadne::{Label, Report, ReportKind, Source};
use expander::diagnostics::Diagnostic;
use syntax::{ReadError, SrcLoc};

/// Byte offset of a 1-based (line, column) position in `source`.
fn offset_of(source: &str, line: u32, col: u32) -> usize {
    let mut offset = 0;
    for (i, text) in source.split_inclusive('\n').enumerate() {
        if i + 1 == line as usize {
            let col = (col.saturating_sub(1)) as usize;
            return offset + text.len().min(col);
        }
        offset += text.len();
    }
    source.len()
}

fn span_of(source: &str, loc: &SrcLoc) -> std::ops::Range<usize> {
    let start = offset_of(source, loc.start_line, loc.start_col);
    let end = offset_of(source, loc.end_line, loc.end_col).max(start);
    start..end
}

pub fn report_diagnostic(diagnostic: &Diagnostic, filename: &str, source: &str) {
    let primary = diagnostic
        .loc
        .as_ref()
        .map(|loc| span_of(source, loc))
        .unwrap_or(0..0);
    let mut builder =
        Report::build(ReportKind::Error, filename, primary.start).with_message(&diagnostic.message);
    for (loc, message) in &diagnostic.labels {
        builder = builder.with_label(Label::new((filename, span_of(source, loc))).with_message(message));
    }
    let _ = builder.finish().eprint((filename, Source::from(source)));
}

pub fn report_read_err(err: &ReadError, filename: &str, source: &str) {
    let loc = match err {
        ReadError::UnexpectedEof { loc }
        | ReadError::UnexpectedChar { loc, .. }
        | ReadError::UnmatchedDelimiter { loc, .. }
        | ReadError::BadEscape { loc, .. }
        | ReadError::UnknownHashSyntax { loc, .. }
        | ReadError::SignalTooLarge { loc }
        | ReadError::MisplacedLangHeader { loc }
        | ReadError::BadLangHeader { loc } => loc.clone(),
    };
    let diagnostic = Diagnostic::new(err.to_string())
        .with_loc(loc.clone())
        .with_label(loc, "the reader stopped here".to_string());
    report_diagnostic(&diagnostic, filename, source);
}
