//! `ember`: thin CLI around `ember-runtime`.
//!
//! Runs a script file, or drops into a line-based REPL when no path is
//! given. No environment variables, no persisted state; the only
//! nontrivial logic here is exit-code translation.

mod commands;
mod dump;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

use clap::Parser;

/// A small dynamically typed scripting language.
#[derive(Parser)]
#[command(name = "ember", version)]
struct Cli {
    /// Script to run. Omit to start the REPL.
    script: Option<PathBuf>,

    /// Print the compiled bytecode disassembly instead of running it.
    #[arg(long)]
    dump: bool,
}

/// Process exit status: 0 / 65 compile error / 70 runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok,
    CompileError,
    RuntimeError,
}

impl From<ExitCode> for ProcessExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Ok => ProcessExitCode::from(0),
            ExitCode::CompileError => ProcessExitCode::from(65),
            ExitCode::RuntimeError => ProcessExitCode::from(70),
        }
    }
}

fn main() -> ProcessExitCode {
    let cli = Cli::parse();

    let result = match &cli.script {
        Some(path) => commands::run::run(path, cli.dump),
        None => Ok(repl::run()),
    };

    match result {
        Ok(code) => code.into(),
        Err(err) => {
            eprintln!("ember: {err:#}");
            ProcessExitCode::from(1)
        }
    }
}
