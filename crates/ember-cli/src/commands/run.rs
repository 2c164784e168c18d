//! `run` command: execute a script file.
//!
//! Reads the whole file into memory up front, since the source must outlive
//! compilation, and hands it to a fresh [`Vm`]. The exit-code mapping
//! (0 / 65 / 70) lives in `main.rs`, the actual process boundary; this
//! module only produces an [`ExitCode`] for it to translate.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ember_runtime::{InterpretResult, Vm};

use crate::ExitCode;

pub fn run(path: &Path, dump: bool) -> Result<ExitCode> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read source file: {}", path.display()))?;

    if dump {
        return Ok(crate::dump::dump_source(&source));
    }

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        InterpretResult::Ok => Ok(ExitCode::Ok),
        InterpretResult::CompileError(err) => {
            for diag in err.diagnostics() {
                eprintln!("{diag}");
            }
            Ok(ExitCode::CompileError)
        }
        InterpretResult::RuntimeError(err) => {
            eprintln!("{err}");
            Ok(ExitCode::RuntimeError)
        }
    }
}
