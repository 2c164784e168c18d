//! `--dump`: compile a script and print its bytecode disassembly.
//!
//! Exercises [`ember_runtime::chunk::disassemble`] against a real compile.
//! This never runs the program; a compile error still exits 65.

use ember_runtime::object::ObjHandle;
use ember_runtime::{chunk::disassemble, Compiler, Heap};

use crate::ExitCode;

pub fn dump_source(source: &str) -> ExitCode {
    let mut heap = Heap::new();
    match Compiler::compile(source, &mut heap) {
        Ok(script) => {
            dump_function(&heap, script);
            ExitCode::Ok
        }
        Err(err) => {
            for diag in err.diagnostics() {
                eprintln!("{diag}");
            }
            ExitCode::CompileError
        }
    }
}

/// Print `function`'s chunk, then recurse into every nested function stored
/// in its constant pool; the disassembler itself stays single-chunk, leaving
/// this recursion to the caller.
fn dump_function(heap: &Heap, function: ObjHandle) {
    let chunk = heap.chunk_mut(function);
    let name = function
        .as_function()
        .and_then(|f| f.name)
        .map(|n| n.as_string().unwrap().value.clone())
        .unwrap_or_else(|| "script".to_string());
    print!("{}", disassemble(chunk, &name));

    let nested: Vec<ObjHandle> = chunk
        .constants
        .iter()
        .filter_map(|c| c.as_obj())
        .filter(|o| o.as_function().is_some())
        .collect();
    for f in nested {
        dump_function(heap, f);
    }
}
