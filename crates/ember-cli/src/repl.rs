//! Interactive, line-based REPL.
//!
//! One [`Vm`] lives for the whole session, so globals and heap-allocated
//! state persist across lines; each line is compiled and run independently,
//! so a mistake on one line never corrupts previously defined globals or
//! functions.

use ember_runtime::{InterpretResult, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::ExitCode;

pub fn run() -> ExitCode {
    let mut vm = Vm::new();
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("failed to start line editor: {err}");
            return ExitCode::RuntimeError;
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match vm.interpret(&line) {
                    InterpretResult::Ok => {}
                    InterpretResult::CompileError(err) => {
                        for diag in err.diagnostics() {
                            eprintln!("{diag}");
                        }
                    }
                    InterpretResult::RuntimeError(err) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        }
    }
    ExitCode::Ok
}
