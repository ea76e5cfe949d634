//! Interactive driver: read a form, expand it, print the core term.
//!
//! Meta-commands: `:quit`, `:graph` (toggle JSON graph dumps),
//! `:signal N` (deliver a signal; resumes a pending blocked expansion),
//! `:trace` (show the macro-use steps of the last expansion).

use crate::render;
use expander::{Expander, Expansion};
use kernel::ast::NodeId;
use kernel::eval::Signal;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use syntax::reader::Reader;

pub fn run() -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut expander = Expander::new();
    let mut pending: Option<NodeId> = None;
    let mut show_graph = false;

    loop {
        match rl.readline("stitch> ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                match line.as_str() {
                    ":quit" => break,
                    ":graph" => {
                        show_graph = !show_graph;
                        println!(
                            "graph dumps {}",
                            if show_graph { "on" } else { "off" }
                        );
                    }
                    ":trace" => {
                        let trace = expander.trace();
                        if trace.is_empty() {
                            println!("no macro steps recorded");
                        } else {
                            println!("{}", crate::expand::format_trace(trace));
                        }
                    }
                    _ => {
                        if let Some(rest) = line.strip_prefix(":signal") {
                            handle_signal(rest, &mut expander, &mut pending, show_graph);
                        } else if pending.is_some() {
                            println!(
                                "an expansion is blocked; deliver its signal with :signal N"
                            );
                        } else {
                            read_and_expand(&line, &mut expander, &mut pending, show_graph);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_signal(
    arg: &str,
    expander: &mut Expander,
    pending: &mut Option<NodeId>,
    show_graph: bool,
) {
    let n: u64 = match arg.trim().parse() {
        Ok(n) => n,
        Err(_) => {
            println!("usage: :signal N");
            return;
        }
    };
    expander.send_signal(Signal(n));
    println!("sent signal #{}", n);
    if let Some(root) = *pending {
        drive_and_print(expander, root, pending, show_graph);
    }
}

fn read_and_expand(
    line: &str,
    expander: &mut Expander,
    pending: &mut Option<NodeId>,
    show_graph: bool,
) {
    let forms = match Reader::new(line, "<repl>").read_all() {
        Ok(forms) => forms,
        Err(err) => {
            render::report_read_err(&err, "<repl>", line);
            return;
        }
    };
    for form in forms {
        let root = expander.begin_expression(form);
        drive_and_print(expander, root, pending, show_graph);
        if pending.is_some() {
            break;
        }
    }
}

fn drive_and_print(
    expander: &mut Expander,
    root: NodeId,
    pending: &mut Option<NodeId>,
    show_graph: bool,
) {
    match expander.drive(root) {
        Ok(Expansion::Complete(graph)) => {
            *pending = None;
            if show_graph {
                match serde_json::to_string_pretty(&graph) {
                    Ok(json) => println!("{}", json),
                    Err(err) => println!("graph dump failed: {}", err),
                }
            }
            match graph.to_core() {
                Some(core) => println!("{}", core),
                None => println!("{}", graph.zonk()),
            }
        }
        Ok(Expansion::Blocked { task, signal }) => {
            *pending = Some(root);
            println!(
                "blocked: task {} is waiting on signal {} (:signal {} to resume)",
                task, signal, signal.0
            );
        }
        Err(err) => {
            *pending = None;
            println!("error: {}", err);
        }
    }
}
