//! End-to-end VM tests, driven entirely through `Vm::interpret`, no peeking
//! at compiler or heap internals.

use ember_runtime::{InterpretResult, Vm};

fn expect_ok(source: &str) {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError(e) => panic!("unexpected compile error: {e}"),
        InterpretResult::RuntimeError(e) => panic!("unexpected runtime error: {e}"),
    }
}

fn expect_runtime_error(source: &str) -> ember_runtime::RuntimeError {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        InterpretResult::RuntimeError(e) => e,
        InterpretResult::Ok => panic!("expected a runtime error, program ran to completion"),
        InterpretResult::CompileError(e) => panic!("expected a runtime error, got compile error: {e}"),
    }
}

#[test]
fn arithmetic_respects_operator_precedence() {
    expect_ok("if (1 + 2 * 3 != 7) { print \"wrong\"; }");
}

#[test]
fn while_loops_terminate_and_mutate_globals() {
    expect_ok("var i = 0; while (i < 1000) { i = i + 1; } if (i != 1000) print \"wrong\";");
}

#[test]
fn recursive_fibonacci_runs_to_completion() {
    expect_ok(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } \
         if (fib(10) != 55) print \"wrong\";",
    );
}

#[test]
fn globals_persist_and_reassign() {
    expect_ok("var total = 0; fun add(n) { total = total + n; } add(3); add(4); if (total != 7) print \"wrong\";");
}

#[test]
fn calling_a_non_function_value_is_a_runtime_error() {
    let err = expect_runtime_error("var x = 1; x();");
    assert!(err.message.contains("Can only call"));
}

#[test]
fn the_stack_trace_on_a_runtime_error_names_every_active_frame() {
    let err = expect_runtime_error(
        "fun inner() { return 1 + \"a\"; } fun outer() { return inner(); } outer();",
    );
    assert!(err.trace.contains("inner"));
    assert!(err.trace.contains("outer"));
}

#[test]
fn deeply_recursive_calls_overflow_the_frame_stack_with_a_runtime_error() {
    let err = expect_runtime_error("fun rec(n) { return rec(n + 1); } rec(0);");
    assert!(err.message.to_lowercase().contains("stack overflow"));
}

#[test]
fn native_clock_returns_a_number() {
    expect_ok("if (clock() < 0) print \"wrong\";");
}

#[test]
fn calling_clock_with_arguments_is_a_runtime_error() {
    let err = expect_runtime_error("clock(1);");
    assert!(err.message.contains("0 arguments"));
}
