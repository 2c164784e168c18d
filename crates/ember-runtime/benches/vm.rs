//! VM execution benchmarks.
//!
//! Benchmarks the compile+run path on canonical programs that stress
//! different parts of the interpreter: arithmetic loops, recursive calls,
//! and string concatenation (the one allocation-heavy path in the core).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ember_runtime::Vm;

fn interpret(source: &str) {
    let mut vm = Vm::new();
    let _ = vm.interpret(black_box(source));
}

fn bench_arithmetic_loop(c: &mut Criterion) {
    c.bench_function("vm_arithmetic_loop_10k", |b| {
        let code = "var sum = 0; for (var i = 0; i < 10000; i = i + 1) sum = sum + i;";
        b.iter(|| interpret(code));
    });
}

fn bench_fibonacci(c: &mut Criterion) {
    c.bench_function("vm_fibonacci_20", |b| {
        let code = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } fib(20);";
        b.iter(|| interpret(code));
    });
}

fn bench_string_concat(c: &mut Criterion) {
    c.bench_function("vm_string_concat_500", |b| {
        let code = r#"var s = ""; for (var i = 0; i < 500; i = i + 1) s = s + "x";"#;
        b.iter(|| interpret(code));
    });
}

fn bench_closure_calls(c: &mut Criterion) {
    c.bench_function("vm_closure_calls_10k", |b| {
        let code = "fun makeAdder(n) { fun add(x) { return x + n; } return add; } \
                     var inc = makeAdder(1); var r = 0; \
                     for (var i = 0; i < 10000; i = i + 1) r = inc(r);";
        b.iter(|| interpret(code));
    });
}

criterion_group!(
    benches,
    bench_arithmetic_loop,
    bench_fibonacci,
    bench_string_concat,
    bench_closure_calls
);
criterion_main!(benches);
