use crate::errors::ExpansionErr;
use syntax::SrcLoc;

/// A renderable expansion failure: the headline message plus labeled
/// source points.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub loc: Option<SrcLoc>,
    pub labels: Vec<(SrcLoc, String)>,
}

impl Diagnostic {
    pub fn new(message: String) -> Self {
        Self {
            message,
            loc: None,
            labels: Vec::new(),
        }
    }

    pub fn with_loc(mut self, loc: SrcLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_label(mut self, loc: SrcLoc, message: String) -> Self {
        self.labels.push((loc, message));
        self
    }

    pub fn from_expansion_err(err: &ExpansionErr) -> Self {
        let mut diagnostic = Diagnostic::new(err.to_string());
        if let Some(loc) = err.loc() {
            diagnostic = diagnostic
                .with_loc(loc.clone())
                .with_label(loc.clone(), label_for(err).to_string());
        }
        diagnostic
    }
}

fn label_for(err: &ExpansionErr) -> &'static str {
    match err {
        ExpansionErr::Ambiguous { .. } => "more than one binding matches here",
        ExpansionErr::Unknown { .. } => "not bound in any visible scope",
        ExpansionErr::NotIdentifier { .. } => "expected an identifier",
        ExpansionErr::NotEmpty { .. } => "expected nothing more here",
        ExpansionErr::NotCons { .. } => "expected a non-empty list",
        ExpansionErr::NotRightLength { .. } => "wrong number of elements",
        ExpansionErr::WrongCategory { .. } => "used here",
        ExpansionErr::Eval { .. } => "while running this macro",
        ExpansionErr::StuckExpansion { .. } => "expansion stopped here",
    }
}

/// Collects the diagnostics of one driver run, so every failing
/// top-level form gets reported instead of just the first.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
