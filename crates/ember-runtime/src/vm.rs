//! The stack-based bytecode interpreter.
//!
//! Owns the value stack, call-frame stack, open-upvalue list, globals
//! table, and the heap. `run` is the classic fetch-decode-execute loop: one
//! opcode byte drives dispatch, with 0/1/2-byte immediate operands depending
//! on the instruction.

use crate::chunk::OpCode;
use crate::heap::{Heap, RootSource};
use crate::object::{ObjHandle, ObjKind};
use crate::table::{hash_bytes, Table};
use crate::value::{RuntimeError, Value};

const STACK_MAX: usize = 16384;
const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: ObjHandle,
    ip: usize,
    /// Index into the value stack of this frame's slot 0 (the callee).
    base: usize,
}

pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table<Value>,
    open_upvalues: Option<ObjHandle>,
    /// Handle of the interned string `"clock"`, doubling as the sentinel
    /// value the native function resolves to. `call_value` special-cases
    /// this one handle rather than running a chunk for it.
    native_clock_name: Option<ObjHandle>,
}

/// Result of a top-level `interpret` call.
pub enum InterpretResult {
    Ok,
    CompileError(crate::diagnostic::CompileError),
    RuntimeError(RuntimeError),
}

impl RootSource for Vm {
    /// VM roots: the live value stack, every active frame's closure, the
    /// globals table, and the open-upvalue list.
    fn mark_roots(&self, heap: &Heap, grey: &mut Vec<ObjHandle>) {
        for value in &self.stack {
            heap.mark_value(*value, grey);
        }
        for frame in &self.frames {
            heap.mark_object(frame.closure, grey);
        }
        for (key, value) in self.globals.iter() {
            heap.mark_object(key, grey);
            heap.mark_value(value, grey);
        }
        let mut cur = self.open_upvalues;
        while let Some(handle) = cur {
            heap.mark_object(handle, grey);
            cur = handle.as_upvalue().and_then(|u| u.next_open.get());
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            heap: Heap::new(),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: None,
            native_clock_name: None,
        };
        vm.define_native_clock();
        vm
    }

    /// Seed the one native function the VM ships: `clock()` returns elapsed
    /// process time in seconds. It is resolved as a global like any user
    /// function, but the VM special-cases calling it rather than running a
    /// chunk (see `call_value`).
    fn define_native_clock(&mut self) {
        let name = self.heap.intern_string("clock", &NoRoots);
        let hash = hash_bytes(b"clock");
        self.globals.set(name, hash, Value::Obj(name));
        self.native_clock_name = Some(name);
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match crate::compiler::Compiler::compile(source, &mut self.heap) {
            Ok(f) => f,
            Err(e) => return InterpretResult::CompileError(e),
        };

        // `alloc_closure` needs `self` as a `RootSource` while also needing a
        // mutable borrow of `self.heap`. Swap the heap out to a disjoint
        // local so the two borrows don't alias (`self.heap` is a field of
        // `self`, so `self.heap.alloc_closure(.., self)` cannot borrow-check
        // directly).
        let mut heap = std::mem::take(&mut self.heap);
        let closure = heap.alloc_closure(function, Vec::new(), self);
        self.heap = heap;
        self.stack.push(Value::Obj(closure));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: 0,
        });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(e) => {
                self.stack.clear();
                self.frames.clear();
                InterpretResult::RuntimeError(e)
            }
        }
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().base;
                    self.push(self.stack[base + slot])?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let up = closure.as_closure().unwrap().upvalues[slot];
                    let value = up.as_upvalue().unwrap().get(&self.stack);
                    self.push(value)?;
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let up = closure.as_closure().unwrap().upvalues[slot];
                    let value = self.peek(0);
                    up.as_upvalue().unwrap().set(&mut self.stack, value);
                }
                OpCode::CloseUpvalue => {
                    let limit = self.stack.len() - 1;
                    self.heap
                        .close_upvalues(&self.stack, &mut self.open_upvalues, limit);
                    self.pop();
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    let hash = name.as_string().unwrap().hash;
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = name.as_string().unwrap().hash;
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value)?,
                        None => {
                            let msg = format!("Undefined variable '{}'.", name.as_string().unwrap().value);
                            return Err(self.runtime_error(&msg));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = name.as_string().unwrap().hash;
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        // `set` reported a brand-new key: the global was
                        // never defined. Undo the insert and fault; a plain
                        // assignment must not create one.
                        self.globals.delete(name, hash);
                        let msg = format!("Undefined variable '{}'.", name.as_string().unwrap().value);
                        return Err(self.runtime_error(&msg));
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(a, b)))?;
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number(|a, b| a - b)?,
                OpCode::Multiply => self.binary_number(|a, b| a * b)?,
                OpCode::Divide => self.binary_number(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()))?;
                }
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n))?;
                        }
                        None => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }
                OpCode::Print => {
                    let v = self.pop();
                    println!("{v}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    self.call_value(arg_count)?;
                }
                OpCode::Closure => {
                    let function = self.read_constant().as_obj().unwrap();
                    let upvalue_count = function.as_function().unwrap().upvalue_count;
                    let mut descriptors = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        descriptors.push(crate::object::UpvalueDescriptor { is_local, index });
                    }
                    let enclosing = self.frames.last().unwrap().closure;
                    // See the comment in `interpret`: swap the heap out to a
                    // disjoint local so it can take `self` as a `RootSource`
                    // argument without aliasing `self.heap`.
                    let mut heap = std::mem::take(&mut self.heap);
                    let upvalues = heap.capture_upvalues(
                        &descriptors,
                        Some(enclosing),
                        &mut self.open_upvalues,
                        self,
                    );
                    let closure = heap.alloc_closure(function, upvalues, self);
                    self.heap = heap;
                    self.push(Value::Obj(closure))?;
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.heap
                        .close_upvalues(&self.stack, &mut self.open_upvalues, frame.base);
                    if self.frames.is_empty() {
                        self.stack.truncate(frame.base);
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result)?;
                }
            }
        }
    }

    // --- stack helpers -----------------------------------------------------

    /// Bounds-checked push. Temporaries, such as a long chain of unreduced
    /// binary operands, can grow the stack independently of call depth, so
    /// this is checked separately from the frame stack.
    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let byte = self.heap.chunk_mut(frame.closure.as_closure().unwrap().function).code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        let function = frame.closure.as_closure().unwrap().function;
        self.heap.chunk_mut(function).constants[index]
    }

    fn read_string(&mut self) -> ObjHandle {
        self.read_constant().as_obj().unwrap()
    }

    // --- arithmetic ----------------------------------------------------------

    fn binary_number(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_number_pair()?;
        self.push(Value::Number(op(a, b)))
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_number_pair()?;
        self.push(Value::Bool(op(a, b)))
    }

    fn pop_number_pair(&mut self) -> Result<(f64, f64), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                Ok((a, b))
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    /// `+` concatenates when both operands are strings, otherwise adds
    /// numbers; any other combination is a type error.
    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        if a.is_string() && b.is_string() {
            let a_str = a.as_obj().unwrap().as_string().unwrap().value.clone();
            let b_str = b.as_obj().unwrap().as_string().unwrap().value.clone();
            self.pop();
            self.pop();
            let concatenated = a_str + &b_str;
            // See the comment in `interpret`: disjoint-local swap so `self`
            // can serve as the `RootSource` argument.
            let mut heap = std::mem::take(&mut self.heap);
            let handle = heap.intern_string(&concatenated, self);
            self.heap = heap;
            self.push(Value::Obj(handle))
        } else if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::Number(a + b))
        } else {
            Err(self.runtime_error("Operands must be two numbers or two strings."))
        }
    }

    // --- calls ---------------------------------------------------------------

    fn call_value(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(arg_count);
        if let Some(name) = self.native_clock_name {
            if let Value::Obj(o) = callee {
                if o == name {
                    return self.call_native_clock(arg_count);
                }
            }
        }
        match callee.as_obj().filter(|o| o.kind() == ObjKind::Closure) {
            Some(closure) => self.call_closure(closure, arg_count),
            None => Err(self.runtime_error("Can only call functions.")),
        }
    }

    fn call_native_clock(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        if arg_count != 0 {
            return Err(self.runtime_error("Expected 0 arguments to 'clock'."));
        }
        self.pop(); // the native marker itself
        let seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.push(Value::Number(seconds))
    }

    fn call_closure(&mut self, closure: ObjHandle, arg_count: usize) -> Result<(), RuntimeError> {
        let function = closure.as_closure().unwrap().function;
        let arity = function.as_function().unwrap().arity as usize;
        if arg_count != arity {
            return Err(self.runtime_error(&format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        if self.stack.len() + 1 >= STACK_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let base = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
        });
        Ok(())
    }

    // --- introspection ---------------------------------------------------

    /// Force every subsequent allocation to collect first. Used by tests to
    /// make GC timing deterministic instead of waiting on the heap's growth
    /// threshold.
    pub fn set_stress_gc(&mut self, enabled: bool) {
        self.heap.stress_gc = enabled;
    }

    /// Number of objects currently reachable from the heap's "all objects"
    /// list. Exposed for tests asserting on collector reachability without
    /// reaching past the VM into a bare `Heap`.
    pub fn live_object_count(&self) -> usize {
        self.heap.live_count()
    }

    /// Number of full collections run so far.
    pub fn gc_cycles(&self) -> usize {
        self.heap.collections
    }

    // --- error reporting -------------------------------------------------

    /// Build a stack trace from every active frame's `ip - 1` mapped
    /// through its chunk's line table.
    fn runtime_error(&self, message: &str) -> RuntimeError {
        let mut trace = String::new();
        for frame in self.frames.iter().rev() {
            let function = frame.closure.as_closure().unwrap().function;
            let chunk = self.heap.chunk_mut(function);
            let line = chunk.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0);
            let name = match function.as_function().unwrap().name {
                Some(n) => n.as_string().unwrap().value.clone(),
                None => "script".to_string(),
            };
            trace.push_str(&format!("[line {line}] in {name}\n"));
        }
        RuntimeError::new(message, trace.trim_end())
    }
}

struct NoRoots;
impl RootSource for NoRoots {
    fn mark_roots(&self, _heap: &Heap, _grey: &mut Vec<ObjHandle>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ok(source: &str) {
        let mut vm = Vm::new();
        match vm.interpret(source) {
            InterpretResult::Ok => {}
            InterpretResult::CompileError(e) => panic!("compile error: {e}"),
            InterpretResult::RuntimeError(e) => panic!("runtime error: {e}"),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        run_ok("print 1 + 2 * 3;");
    }

    #[test]
    fn for_loop_accumulates() {
        run_ok("var x = 0; for (var i = 0; i < 5; i = i + 1) x = x + i; print x;");
    }

    #[test]
    fn closures_share_captured_state() {
        run_ok(
            "fun makeCounter() { var n = 0; fun inc() { n = n + 1; return n; } return inc; } \
             var c = makeCounter(); print c(); print c(); print c();",
        );
    }

    #[test]
    fn string_interning_makes_equal_content_identical() {
        run_ok("var a = \"foo\"; var b = \"foo\"; print a == b;");
    }

    #[test]
    fn block_scoping_restores_outer_binding() {
        run_ok("var x = 1; { var x = x + 1; print x; } print x;");
    }

    #[test]
    fn adding_number_and_string_is_a_runtime_error() {
        let mut vm = Vm::new();
        match vm.interpret("1 + \"a\";") {
            InterpretResult::RuntimeError(_) => {}
            _ => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn assigning_to_undeclared_global_is_a_runtime_error() {
        let mut vm = Vm::new();
        match vm.interpret("x = 1;") {
            InterpretResult::RuntimeError(e) => assert!(e.message.contains("Undefined variable")),
            _ => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn calling_with_wrong_arity_is_a_runtime_error() {
        let mut vm = Vm::new();
        match vm.interpret("fun f() { return 1; } f(1);") {
            InterpretResult::RuntimeError(_) => {}
            _ => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn duplicate_local_declaration_is_a_compile_error() {
        let mut vm = Vm::new();
        match vm.interpret("{ var x = 1; var x = 2; }") {
            InterpretResult::CompileError(_) => {}
            _ => panic!("expected a compile error"),
        }
    }

    #[test]
    fn recursive_function_identity_is_stable() {
        run_ok("fun f() { return f; } print f() == f;");
    }
}
