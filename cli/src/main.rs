use clap::{Parser, Subcommand, ValueEnum};
use cli::expand::{expand_source, expand_source_json, format_trace, ExpandMode};
use cli::{render, repl};
use expander::diagnostics::DiagnosticCollector;
use expander::Expander;
use std::fs;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about = "Front end of the stitch language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Expression,
    Declaration,
    Module,
}

impl From<ModeArg> for ExpandMode {
    fn from(mode: ModeArg) -> ExpandMode {
        match mode {
            ModeArg::Expression => ExpandMode::Expression,
            ModeArg::Declaration => ExpandMode::Declaration,
            ModeArg::Module => ExpandMode::Module,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expand a source file and print the resulting core terms
    Expand {
        file: String,
        /// How to treat the top-level forms
        #[arg(long, value_enum, default_value_t = ModeArg::Module)]
        mode: ModeArg,
        /// Dump partial core graphs as JSON instead of rendered terms
        #[arg(long, conflicts_with = "trace")]
        json: bool,
        /// Also print the macro-use trace
        #[arg(long)]
        trace: bool,
    },
    /// Start an interactive expander session
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Expand {
            file,
            mode,
            json,
            trace,
        } => {
            let source = match fs::read_to_string(&file) {
                Ok(source) => source,
                Err(err) => {
                    eprintln!("cannot read {}: {}", file, err);
                    return ExitCode::FAILURE;
                }
            };
            let mut expander = Expander::new();
            let mut diagnostics = DiagnosticCollector::new();
            let result = if json {
                expand_source_json(&source, &file, &mut expander, &mut diagnostics)
            } else {
                expand_source(&source, &file, &mut expander, mode.into(), &mut diagnostics)
            };
            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        println!("{}", output);
                    }
                    if trace {
                        let steps = expander.take_trace();
                        if !steps.is_empty() {
                            println!("; macro steps:");
                            println!("{}", format_trace(&steps));
                        }
                    }
                    for diagnostic in &diagnostics.diagnostics {
                        render::report_diagnostic(diagnostic, &file, &source);
                    }
                    if diagnostics.has_errors() {
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(err) => {
                    render::report_read_err(&err, &file, &source);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Repl => match repl::run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("repl error: {}", err);
                ExitCode::FAILURE
            }
        },
    }
}
