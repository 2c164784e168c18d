//! Single-pass Pratt compiler: tokens straight to bytecode, no AST.
//!
//! Each syntactic form is compiled the moment it is recognized, with no
//! intermediate tree to walk afterwards. Precedence climbing is table-driven
//! (`rule_for`): every token kind knows its own prefix handler, infix
//! handler, and binding precedence.

use crate::chunk::OpCode;
use crate::diagnostic::{CompileError, Diagnostic};
use crate::heap::{Heap, RootSource};
use crate::object::{ObjHandle, UpvalueDescriptor};
use crate::scanner::Scanner;
use crate::span::Span;
use crate::token::{Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

/// A local variable slot tracked during compilation. `depth == None` marks a
/// local that has been declared but whose initializer has not finished
/// compiling yet, guarding against a bare reference to it in that window.
struct Local<'src> {
    name: Token<'src>,
    depth: Option<u32>,
    captured: bool,
}

/// One pending upvalue resolved while compiling a nested function: either it
/// closes over a local one level up, or it closes over an upvalue from the
/// function enclosing *that* one.
struct UpvalueSlot {
    index: u8,
    is_local: bool,
}

/// Distinguishes a named function body from the implicit top-level script
/// body, which gets an implicit `NIL; RETURN` rather than requiring an
/// explicit `return`.
#[derive(PartialEq, Eq, Clone, Copy)]
enum FunctionKind {
    Script,
    Function,
}

/// Per-function compilation state, stacked one per nested `fun`. Resolving a
/// name walks this stack outward: locals in the current frame, then upvalues
/// through enclosing frames, then falls back to a global.
struct FunctionFrame<'src> {
    function: ObjHandle,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueSlot>,
    scope_depth: u32,
}

impl<'src> FunctionFrame<'src> {
    fn new(function: ObjHandle, kind: FunctionKind) -> Self {
        // Slot 0 is reserved for the callee itself; it is never named, so no
        // user declaration can collide with it.
        let reserved = Local {
            name: Token::new(TokenKind::Error, "", 0),
            depth: Some(0),
            captured: false,
        };
        FunctionFrame {
            function,
            kind,
            locals: vec![reserved],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Tracks the jump list for `break`-free loops; the language has no `break`,
/// but `continue`-equivalent behaviour (the `for` increment clause) needs
/// the loop's start offset to emit `LOOP` against.
struct LoopContext {
    start: usize,
    scope_depth: u32,
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    frames: Vec<FunctionFrame<'src>>,
    loops: Vec<LoopContext>,
}

impl RootSource for Compiler<'_> {
    /// Roots for every function currently under construction: their
    /// `chunk.constants` and the function objects themselves, since compile-
    /// time allocation (string interning, nested function objects) can
    /// trigger a collection mid-compile.
    fn mark_roots(&self, heap: &Heap, grey: &mut Vec<ObjHandle>) {
        for frame in &self.frames {
            heap.mark_object(frame.function, grey);
        }
    }
}

impl<'src> Compiler<'src> {
    pub fn compile(source: &'src str, heap: &mut Heap) -> Result<ObjHandle, CompileError> {
        let mut scanner = Scanner::new(source);
        let first = scanner.scan_token();
        let mut compiler = Compiler {
            scanner,
            current: first,
            previous: first,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            frames: Vec::new(),
            loops: Vec::new(),
        };

        let script = heap.alloc_function(None, &compiler);
        compiler.frames.push(FunctionFrame::new(script, FunctionKind::Script));

        compiler.advance();
        while !compiler.check(TokenKind::Eof) {
            compiler.declaration(heap);
        }
        compiler.consume(TokenKind::Eof, "Expect end of expression.", heap);

        let function = compiler.end_function(heap);
        if compiler.had_error {
            Err(CompileError(compiler.diagnostics))
        } else {
            Ok(function)
        }
    }

    // --- token stream plumbing -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str, heap: &mut Heap) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        let _ = heap;
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    /// Panic-mode recovery: the first error in a run is reported; further
    /// errors are swallowed until `synchronize` finds a statement boundary,
    /// so one mistake doesn't cascade into dozens.
    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let span = Span::new(0, token.lexeme.len());
        self.diagnostics.push(Diagnostic::error(message, token.line, span));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- emission helpers --------------------------------------------------

    fn current_chunk<'a>(&self, heap: &Heap) -> &'a mut crate::chunk::Chunk {
        heap.chunk_mut(self.frames.last().unwrap().function)
    }

    fn emit_op(&mut self, op: OpCode, heap: &mut Heap) {
        let line = self.previous.line;
        self.current_chunk(heap).emit_op(op, line);
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8, heap: &mut Heap) {
        let line = self.previous.line;
        self.current_chunk(heap).emit_op_byte(op, operand, line);
    }

    fn emit_jump(&mut self, op: OpCode, heap: &mut Heap) -> usize {
        let line = self.previous.line;
        self.current_chunk(heap).emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize, heap: &mut Heap) {
        if let Err(message) = self.current_chunk(heap).patch_jump(offset) {
            self.error(&message);
        }
    }

    fn emit_loop(&mut self, loop_start: usize, heap: &mut Heap) {
        let line = self.previous.line;
        if let Err(message) = self.current_chunk(heap).emit_loop(loop_start, line) {
            self.error(&message);
        }
    }

    fn emit_constant(&mut self, value: Value, heap: &mut Heap) {
        match self.current_chunk(heap).add_constant(value) {
            Ok(index) => self.emit_op_byte(OpCode::Constant, index, heap),
            Err(message) => self.error(&message),
        }
    }

    fn make_identifier_constant(&mut self, name: &str, heap: &mut Heap) -> u8 {
        let handle = heap.intern_string(name, self);
        match self.current_chunk(heap).add_constant(Value::Obj(handle)) {
            Ok(index) => index,
            Err(message) => {
                self.error(&message);
                0
            }
        }
    }

    fn end_function(&mut self, heap: &mut Heap) -> ObjHandle {
        // Every function body ends with an implicit `nil; return` unless the
        // last statement already returned. Emitting it unconditionally is
        // harmless dead code in the `return`-terminated case and correct
        // otherwise.
        self.emit_op(OpCode::Nil, heap);
        self.emit_op(OpCode::Return, heap);
        let frame = self.frames.pop().unwrap();
        frame.function
    }

    // --- scopes --------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.frames.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self, heap: &mut Heap) {
        let depth = {
            let frame = self.frames.last_mut().unwrap();
            frame.scope_depth -= 1;
            frame.scope_depth
        };

        loop {
            let action = {
                let frame = self.frames.last_mut().unwrap();
                match frame.locals.last() {
                    Some(local) if local.depth.map_or(false, |d| d > depth) => {
                        let captured = local.captured;
                        frame.locals.pop();
                        Some(captured)
                    }
                    _ => None,
                }
            };
            match action {
                // A captured local must be closed (its value copied onto the
                // heap) before the POP discards its stack slot, or the
                // closure that captured it would read a freed slot.
                Some(true) => self.emit_op(OpCode::CloseUpvalue, heap),
                Some(false) => self.emit_op(OpCode::Pop, heap),
                None => break,
            }
        }
    }

    // --- variable resolution ---------------------------------------------

    fn identifiers_equal(a: &Token, b: &Token) -> bool {
        a.lexeme == b.lexeme
    }

    /// Resolve `name` as a local in `frame_index`'s frame, innermost scope
    /// first. A `None` depth (still being initialized) that matches the name
    /// being looked up is a compile error, except the language deliberately
    /// allows the initializer to see a *shadowed outer* binding of the same
    /// name: only a local in the *same* uninitialized declaration is
    /// rejected, found by it being the very last local pushed.
    fn resolve_local(&mut self, frame_index: usize, name: &Token<'src>) -> Option<u8> {
        let frame = &self.frames[frame_index];
        let mut found: Option<(usize, bool)> = None;
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if Self::identifiers_equal(&local.name, name) {
                let own_initializer = local.depth.is_none() && i == frame.locals.len() - 1;
                found = Some((i, own_initializer));
                break;
            }
        }
        match found {
            Some((i, true)) => {
                self.error("Can't read local variable in its own initializer.");
                Some(i as u8)
            }
            Some((i, false)) => Some(i as u8),
            None => None,
        }
    }

    fn resolve_upvalue(&mut self, frame_index: usize, name: &Token<'src>) -> Option<u8> {
        if frame_index == 0 {
            return None;
        }
        let enclosing = frame_index - 1;

        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.frames[enclosing].locals[local_slot as usize].captured = true;
            return Some(self.add_upvalue(frame_index, local_slot, true));
        }
        if let Some(upvalue_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame_index, upvalue_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, frame_index: usize, index: u8, is_local: bool) -> u8 {
        let frame = &mut self.frames[frame_index];
        for (i, up) in frame.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if frame.upvalues.len() >= u8::MAX as usize {
            self.error("Too many closure variables in function.");
            return 0;
        }
        frame.upvalues.push(UpvalueSlot { index, is_local });
        (frame.upvalues.len() - 1) as u8
    }

    fn declare_variable(&mut self) {
        let frame = self.frames.last().unwrap();
        if frame.scope_depth == 0 {
            return;
        }
        let scope_depth = frame.scope_depth;
        let name = self.previous;
        let mut duplicate = false;
        for local in frame.locals.iter().rev() {
            if local.depth.map_or(false, |d| d < scope_depth) {
                break;
            }
            if Self::identifiers_equal(&local.name, &name) {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: Token<'src>) {
        let frame = self.frames.last_mut().unwrap();
        if frame.locals.len() >= u8::MAX as usize + 1 {
            self.error("Too many local variables in function.");
            return;
        }
        frame.locals.push(Local {
            name,
            depth: None,
            captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let frame = self.frames.last_mut().unwrap();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        frame.locals.last_mut().unwrap().depth = Some(depth);
    }

    fn parse_variable(&mut self, message: &str, heap: &mut Heap) -> u8 {
        self.consume(TokenKind::Identifier, message, heap);
        self.declare_variable();
        if self.frames.last().unwrap().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.make_identifier_constant(name, heap)
    }

    fn define_variable(&mut self, global: u8, heap: &mut Heap) {
        if self.frames.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global, heap);
    }

    // --- statements ------------------------------------------------------

    fn declaration(&mut self, heap: &mut Heap) {
        if self.match_token(TokenKind::Fun) {
            self.fun_declaration(heap);
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(heap);
        } else {
            self.statement(heap);
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fun_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("Expect function name.", heap);
        self.mark_initialized();
        self.function(FunctionKind::Function, heap);
        self.define_variable(global, heap);
    }

    fn function(&mut self, kind: FunctionKind, heap: &mut Heap) {
        let name_text = self.previous.lexeme.to_string();
        let func_obj = heap.alloc_function(None, self);
        self.frames.push(FunctionFrame::new(func_obj, kind));
        let name_handle = heap.intern_string(&name_text, self);
        heap.function_mut(func_obj).name = Some(name_handle);

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.", heap);
        if !self.check(TokenKind::RightParen) {
            loop {
                let current_arity = heap.function_mut(self.frames.last().unwrap().function).arity;
                if current_arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    heap.function_mut(self.frames.last().unwrap().function).arity = current_arity + 1;
                }
                let constant = self.parse_variable("Expect parameter name.", heap);
                self.define_variable(constant, heap);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.", heap);
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.", heap);
        self.block(heap);

        let upvalues: Vec<UpvalueDescriptor> = self
            .frames
            .last()
            .unwrap()
            .upvalues
            .iter()
            .map(|u| UpvalueDescriptor {
                is_local: u.is_local,
                index: u.index,
            })
            .collect();
        let function = self.end_function(heap);
        heap.function_mut(function).upvalue_count = upvalues.len();

        let enclosing_line = self.previous.line;
        let constant = match self
            .current_chunk(heap)
            .add_constant(Value::Obj(function))
        {
            Ok(idx) => idx,
            Err(message) => {
                self.error(&message);
                0
            }
        };
        self.current_chunk(heap).emit_op_byte(OpCode::Closure, constant, enclosing_line);
        for up in &upvalues {
            self.current_chunk(heap)
                .emit_byte(if up.is_local { 1 } else { 0 }, enclosing_line);
            self.current_chunk(heap).emit_byte(up.index, enclosing_line);
        }
    }

    fn var_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("Expect variable name.", heap);
        if self.match_token(TokenKind::Equal) {
            self.expression(heap);
        } else {
            self.emit_op(OpCode::Nil, heap);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
            heap,
        );
        self.define_variable(global, heap);
    }

    fn statement(&mut self, heap: &mut Heap) {
        if self.match_token(TokenKind::Print) {
            self.print_statement(heap);
        } else if self.match_token(TokenKind::For) {
            self.for_statement(heap);
        } else if self.match_token(TokenKind::If) {
            self.if_statement(heap);
        } else if self.match_token(TokenKind::Return) {
            self.return_statement(heap);
        } else if self.match_token(TokenKind::While) {
            self.while_statement(heap);
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block(heap);
            self.end_scope(heap);
        } else {
            self.expression_statement(heap);
        }
    }

    fn block(&mut self, heap: &mut Heap) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration(heap);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.", heap);
    }

    fn print_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "Expect ';' after value.", heap);
        self.emit_op(OpCode::Print, heap);
    }

    fn return_statement(&mut self, heap: &mut Heap) {
        if self.frames.last().unwrap().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_op(OpCode::Nil, heap);
            self.emit_op(OpCode::Return, heap);
        } else {
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.", heap);
            self.emit_op(OpCode::Return, heap);
        }
    }

    fn if_statement(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.", heap);
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after condition.", heap);

        let then_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        self.emit_op(OpCode::Pop, heap);
        self.statement(heap);

        let else_jump = self.emit_jump(OpCode::Jump, heap);
        self.patch_jump(then_jump, heap);
        self.emit_op(OpCode::Pop, heap);

        if self.match_token(TokenKind::Else) {
            self.statement(heap);
        }
        self.patch_jump(else_jump, heap);
    }

    fn while_statement(&mut self, heap: &mut Heap) {
        let loop_start = self.current_chunk(heap).code.len();
        self.loops.push(LoopContext {
            start: loop_start,
            scope_depth: self.frames.last().unwrap().scope_depth,
        });

        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.", heap);
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after condition.", heap);

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        self.emit_op(OpCode::Pop, heap);
        self.statement(heap);
        self.emit_loop(loop_start, heap);

        self.patch_jump(exit_jump, heap);
        self.emit_op(OpCode::Pop, heap);
        self.loops.pop();
    }

    fn for_statement(&mut self, heap: &mut Heap) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.", heap);

        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(heap);
        } else {
            self.expression_statement(heap);
        }

        let mut loop_start = self.current_chunk(heap).code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.", heap);
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse, heap));
            self.emit_op(OpCode::Pop, heap);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump, heap);
            let increment_start = self.current_chunk(heap).code.len();
            self.expression(heap);
            self.emit_op(OpCode::Pop, heap);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.", heap);

            self.emit_loop(loop_start, heap);
            loop_start = increment_start;
            self.patch_jump(body_jump, heap);
        }

        self.loops.push(LoopContext {
            start: loop_start,
            scope_depth: self.frames.last().unwrap().scope_depth,
        });
        self.statement(heap);
        self.emit_loop(loop_start, heap);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump, heap);
            self.emit_op(OpCode::Pop, heap);
        }

        self.loops.pop();
        self.end_scope(heap);
    }

    fn expression_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.", heap);
        self.emit_op(OpCode::Pop, heap);
    }

    // --- expressions (Pratt parsing) --------------------------------------

    fn expression(&mut self, heap: &mut Heap) {
        self.parse_precedence(Precedence::Assignment, heap);
    }

    fn parse_precedence(&mut self, precedence: Precedence, heap: &mut Heap) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign, heap) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= rule_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign, heap);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool, heap: &mut Heap) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(heap),
            TokenKind::Minus | TokenKind::Bang => self.unary(kind, heap),
            TokenKind::Number => self.number(heap),
            TokenKind::String => self.string(heap),
            TokenKind::False | TokenKind::True | TokenKind::Nil => self.literal(kind, heap),
            TokenKind::Identifier => self.variable(can_assign, heap),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool, heap: &mut Heap) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(kind, heap),
            TokenKind::And => self.and(heap),
            TokenKind::Or => self.or(heap),
            TokenKind::LeftParen => self.call(heap),
            _ => {
                let _ = can_assign;
            }
        }
    }

    fn grouping(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after expression.", heap);
    }

    fn unary(&mut self, kind: TokenKind, heap: &mut Heap) {
        self.parse_precedence(Precedence::Unary, heap);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate, heap),
            TokenKind::Bang => self.emit_op(OpCode::Not, heap),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, kind: TokenKind, heap: &mut Heap) {
        let rule = rule_precedence(kind);
        self.parse_precedence(rule.next(), heap);
        match kind {
            TokenKind::Plus => self.emit_op(OpCode::Add, heap),
            TokenKind::Minus => self.emit_op(OpCode::Subtract, heap),
            TokenKind::Star => self.emit_op(OpCode::Multiply, heap),
            TokenKind::Slash => self.emit_op(OpCode::Divide, heap),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal, heap);
                self.emit_op(OpCode::Not, heap);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal, heap),
            TokenKind::Greater => self.emit_op(OpCode::Greater, heap),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less, heap);
                self.emit_op(OpCode::Not, heap);
            }
            TokenKind::Less => self.emit_op(OpCode::Less, heap),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater, heap);
                self.emit_op(OpCode::Not, heap);
            }
            _ => unreachable!(),
        }
    }

    fn and(&mut self, heap: &mut Heap) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        self.emit_op(OpCode::Pop, heap);
        self.parse_precedence(Precedence::And, heap);
        self.patch_jump(end_jump, heap);
    }

    fn or(&mut self, heap: &mut Heap) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        let end_jump = self.emit_jump(OpCode::Jump, heap);
        self.patch_jump(else_jump, heap);
        self.emit_op(OpCode::Pop, heap);
        self.parse_precedence(Precedence::Or, heap);
        self.patch_jump(end_jump, heap);
    }

    fn number(&mut self, heap: &mut Heap) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(f64::NAN);
        self.emit_constant(Value::Number(value), heap);
    }

    fn string(&mut self, heap: &mut Heap) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let handle = heap.intern_string(text, self);
        self.emit_constant(Value::Obj(handle), heap);
    }

    fn literal(&mut self, kind: TokenKind, heap: &mut Heap) {
        match kind {
            TokenKind::False => self.emit_op(OpCode::False, heap),
            TokenKind::True => self.emit_op(OpCode::True, heap),
            TokenKind::Nil => self.emit_op(OpCode::Nil, heap),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool, heap: &mut Heap) {
        let name = self.previous;
        let frame_index = self.frames.len() - 1;

        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(frame_index, &name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(frame_index, &name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let constant = self.make_identifier_constant(name.lexeme, heap);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression(heap);
            self.emit_op_byte(set_op, arg, heap);
        } else {
            self.emit_op_byte(get_op, arg, heap);
        }
    }

    fn argument_list(&mut self, heap: &mut Heap) -> u8 {
        let mut count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression(heap);
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count = count.saturating_add(1);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.", heap);
        count
    }

    fn call(&mut self, heap: &mut Heap) {
        let arg_count = self.argument_list(heap);
        self.emit_op_byte(OpCode::Call, arg_count, heap);
    }
}

fn rule_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        LeftParen => Precedence::Call,
        Minus | Plus => Precedence::Term,
        Slash | Star => Precedence::Factor,
        BangEqual | EqualEqual => Precedence::Equality,
        Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
        And => Precedence::And,
        Or => Precedence::Or,
        _ => Precedence::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_simple_program() {
        let mut heap = Heap::new();
        let result = Compiler::compile("print 1 + 2 * 3;", &mut heap);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_duplicate_local_in_same_scope() {
        let mut heap = Heap::new();
        let result = Compiler::compile("{ var x = 1; var x = 2; }", &mut heap);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_return_at_top_level() {
        let mut heap = Heap::new();
        let result = Compiler::compile("return 1;", &mut heap);
        assert!(result.is_err());
    }

    #[test]
    fn allows_shadowing_an_outer_binding_in_its_own_initializer() {
        // The initializer resolves `x` to the *outer* binding, not itself.
        let mut heap = Heap::new();
        let result = Compiler::compile("var x = 1; { var x = x + 1; }", &mut heap);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_unterminated_block() {
        let mut heap = Heap::new();
        let result = Compiler::compile("{ print 1;", &mut heap);
        assert!(result.is_err());
    }
}

