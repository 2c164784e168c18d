//! Flat bytecode buffer: `Chunk` and the `OpCode` enumeration.
//!
//! One byte per opcode; immediates follow directly in the code stream.
//! `lines[i]` gives the 1-based source line for the byte at offset `i`, kept
//! as a parallel array rather than run-length encoded: simplicity over
//! density.

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Constant = 0,
    Nil,
    True,
    False,
    Pop,
    GetLocal,
    SetLocal,
    GetUpvalue,
    SetUpvalue,
    CloseUpvalue,
    DefineGlobal,
    GetGlobal,
    SetGlobal,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,
    Print,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Closure,
    Return,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Self {
        // Safety: every byte ever written to a chunk's code stream comes
        // from `Chunk::emit_op`, which only ever writes a valid `OpCode`
        // discriminant; the compiler never constructs code from raw bytes.
        unsafe { std::mem::transmute::<u8, OpCode>(byte) }
    }
}

/// A compiled function body: code, per-byte line info, and its constant
/// pool. Owned by exactly one `ObjFunction`.
#[derive(Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn emit_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn emit_op(&mut self, op: OpCode, line: u32) {
        self.emit_byte(op as u8, line);
    }

    pub fn emit_op_byte(&mut self, op: OpCode, operand: u8, line: u32) {
        self.emit_op(op, line);
        self.emit_byte(operand, line);
    }

    /// Append a 2-byte big-endian placeholder for a jump offset and return
    /// the offset of its first byte, for later patching.
    pub fn emit_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.emit_op(op, line);
        self.emit_byte(0xff, line);
        self.emit_byte(0xff, line);
        self.code.len() - 2
    }

    /// Back-patch a previously emitted jump to land at the current end of
    /// the code stream. Errors if the jump distance cannot fit in `u16`.
    pub fn patch_jump(&mut self, offset: usize) -> Result<(), String> {
        let jump = self.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err("Too much code to jump over.".to_string());
        }
        self.code[offset] = ((jump >> 8) & 0xff) as u8;
        self.code[offset + 1] = (jump & 0xff) as u8;
        Ok(())
    }

    /// Emit a backward `LOOP` jump to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Result<(), String> {
        self.emit_op(OpCode::Loop, line);
        let offset = self.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err("Loop body too large.".to_string());
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8, line);
        self.emit_byte((offset & 0xff) as u8, line);
        Ok(())
    }

    /// Add `value` to the constant pool, returning its index. Errors once
    /// the pool would exceed 256 entries, since constant operands are a
    /// single byte.
    pub fn add_constant(&mut self, value: Value) -> Result<u8, String> {
        if self.constants.len() >= u8::MAX as usize + 1 {
            return Err("Too many constants in one chunk.".to_string());
        }
        self.constants.push(value);
        Ok((self.constants.len() - 1) as u8)
    }
}

/// Render a chunk as a human-readable disassembly: one line per
/// instruction with its offset, source line, mnemonic, and operand. Not
/// part of the core interpreter loop, a debugging aid.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    out.push_str(&format!("{offset:04} "));
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        out.push_str("   | ");
    } else {
        out.push_str(&format!("{:4} ", chunk.lines[offset]));
    }

    let op = OpCode::from_byte(chunk.code[offset]);
    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset, out),
        OpCode::Nil => simple_instruction("OP_NIL", offset, out),
        OpCode::True => simple_instruction("OP_TRUE", offset, out),
        OpCode::False => simple_instruction("OP_FALSE", offset, out),
        OpCode::Pop => simple_instruction("OP_POP", offset, out),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset, out),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset, out),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset, out),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset, out),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset, out),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset, out),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset, out),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset, out),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset, out),
        OpCode::Greater => simple_instruction("OP_GREATER", offset, out),
        OpCode::Less => simple_instruction("OP_LESS", offset, out),
        OpCode::Add => simple_instruction("OP_ADD", offset, out),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset, out),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset, out),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset, out),
        OpCode::Not => simple_instruction("OP_NOT", offset, out),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset, out),
        OpCode::Print => simple_instruction("OP_PRINT", offset, out),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset, out),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset, out),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset, out),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset, out),
        OpCode::Closure => return closure_instruction(chunk, offset, out),
        OpCode::Return => simple_instruction("OP_RETURN", offset, out),
    }
}

fn simple_instruction(name: &str, offset: usize, out: &mut String) -> usize {
    out.push_str(&format!("{name}\n"));
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code[offset + 1];
    out.push_str(&format!("{name:<16} {slot:4}\n"));
    offset + 2
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code[offset + 1] as usize;
    out.push_str(&format!(
        "{name:<16} {index:4} '{}'\n",
        chunk.constants[index]
    ));
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let jump = ((chunk.code[offset + 1] as u16) << 8 | chunk.code[offset + 2] as u16) as i32;
    let target = offset as i32 + 3 + sign * jump;
    out.push_str(&format!("{name:<16} {offset:4} -> {target}\n"));
    offset + 3
}

fn closure_instruction(chunk: &Chunk, mut offset: usize, out: &mut String) -> usize {
    offset += 1;
    let constant = chunk.code[offset] as usize;
    offset += 1;
    out.push_str(&format!(
        "{:<16} {constant:4} '{}'\n",
        "OP_CLOSURE", chunk.constants[constant]
    ));
    if let Some(func) = chunk.constants[constant].as_obj().and_then(|o| o.as_function()) {
        for _ in 0..func.upvalue_count {
            let is_local = chunk.code[offset];
            offset += 1;
            let index = chunk.code[offset];
            offset += 1;
            let kind = if is_local != 0 { "local" } else { "upvalue" };
            out.push_str(&format!("{offset:04}      |                     {kind} {index}\n"));
        }
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_jump_fills_in_the_forward_offset() {
        let mut chunk = Chunk::new();
        let jump = chunk.emit_jump(OpCode::JumpIfFalse, 1);
        chunk.emit_op(OpCode::Pop, 1);
        chunk.patch_jump(jump).unwrap();
        let hi = chunk.code[jump] as u16;
        let lo = chunk.code[jump + 1] as u16;
        assert_eq!((hi << 8) | lo, 1);
    }

    #[test]
    fn add_constant_rejects_overflow() {
        let mut chunk = Chunk::new();
        for _ in 0..256 {
            chunk.add_constant(Value::Nil).unwrap();
        }
        assert!(chunk.add_constant(Value::Nil).is_err());
    }
}
