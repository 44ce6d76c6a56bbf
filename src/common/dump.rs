//! A read-only view of the bytecode format, for inspection and tests.
//! Nothing here is on the hot path: the VM decodes bytes directly.

use std::fmt::Write;

use crate::common::{
    chunk::Chunk,
    opcode::Opcode,
    value::{Obj, Value},
};

/// One decoded instruction, operands and all.
/// Short/long operand pairs collapse into a single variant here;
/// [`Inst::encode`] re-picks the short form exactly when the compiler
/// would have, so decoding and re-encoding a compiled chunk is lossless.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Constant(u16),
    Nil,
    True,
    False,
    Pop,
    PopN(u8),
    GetLocal(u16),
    SetLocal(u16),
    GetGlobal(u16),
    DefineGlobal(u16),
    SetGlobal(u16),
    GetUpvalue(u16),
    SetUpvalue(u16),
    CloseUpvalue,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,
    Print,
    Jump(u16),
    JumpIfTrue(u16),
    JumpIfFalse(u16),
    Loop(u16),
    Call(u8),
    /// The constant index of the wrapped function,
    /// plus one `(is_local, index)` pair per upvalue.
    Closure { index: u16, upvalues: Vec<(bool, u16)> },
    Return,
}

impl Inst {
    /// Appends this instruction's encoding, choosing short operand
    /// forms for indices up to 255 just like the compiler does.
    pub fn encode(&self, code: &mut Vec<u8>) {
        use Inst::*;

        // an opcode pair plus its index operand
        fn indexed(code: &mut Vec<u8>, short: Opcode, long: Opcode, index: u16) {
            if index <= u8::MAX as u16 {
                code.push(short as u8);
                code.push(index as u8);
            } else {
                code.push(long as u8);
                code.extend_from_slice(&index.to_be_bytes());
            }
        }

        // always two bytes, even for small offsets
        fn wide(code: &mut Vec<u8>, opcode: Opcode, operand: u16) {
            code.push(opcode as u8);
            code.extend_from_slice(&operand.to_be_bytes());
        }

        match self {
            Constant(index) => indexed(code, Opcode::Constant, Opcode::ConstantLong, *index),
            Nil => code.push(Opcode::Nil as u8),
            True => code.push(Opcode::True as u8),
            False => code.push(Opcode::False as u8),
            Pop => code.push(Opcode::Pop as u8),
            PopN(n) => {
                code.push(Opcode::PopN as u8);
                code.push(*n);
            }
            GetLocal(slot) => indexed(code, Opcode::GetLocal, Opcode::GetLocalLong, *slot),
            SetLocal(slot) => indexed(code, Opcode::SetLocal, Opcode::SetLocalLong, *slot),
            GetGlobal(name) => indexed(code, Opcode::GetGlobal, Opcode::GetGlobalLong, *name),
            DefineGlobal(name) => {
                indexed(code, Opcode::DefineGlobal, Opcode::DefineGlobalLong, *name)
            }
            SetGlobal(name) => indexed(code, Opcode::SetGlobal, Opcode::SetGlobalLong, *name),
            GetUpvalue(index) => {
                indexed(code, Opcode::GetUpvalue, Opcode::GetUpvalueLong, *index)
            }
            SetUpvalue(index) => {
                indexed(code, Opcode::SetUpvalue, Opcode::SetUpvalueLong, *index)
            }
            CloseUpvalue => code.push(Opcode::CloseUpvalue as u8),
            Equal => code.push(Opcode::Equal as u8),
            NotEqual => code.push(Opcode::NotEqual as u8),
            Greater => code.push(Opcode::Greater as u8),
            GreaterEqual => code.push(Opcode::GreaterEqual as u8),
            Less => code.push(Opcode::Less as u8),
            LessEqual => code.push(Opcode::LessEqual as u8),
            Add => code.push(Opcode::Add as u8),
            Subtract => code.push(Opcode::Subtract as u8),
            Multiply => code.push(Opcode::Multiply as u8),
            Divide => code.push(Opcode::Divide as u8),
            Not => code.push(Opcode::Not as u8),
            Negate => code.push(Opcode::Negate as u8),
            Print => code.push(Opcode::Print as u8),
            Jump(offset) => wide(code, Opcode::Jump, *offset),
            JumpIfTrue(offset) => wide(code, Opcode::JumpIfTrue, *offset),
            JumpIfFalse(offset) => wide(code, Opcode::JumpIfFalse, *offset),
            Loop(offset) => wide(code, Opcode::Loop, *offset),
            Call(argc) => {
                code.push(Opcode::Call as u8);
                code.push(*argc);
            }
            Closure { index, upvalues } => {
                indexed(code, Opcode::Closure, Opcode::ClosureLong, *index);
                for (is_local, up) in upvalues {
                    code.push(*is_local as u8);
                    code.extend_from_slice(&up.to_be_bytes());
                }
            }
            Return => code.push(Opcode::Return as u8),
        }
    }
}

/// Decodes a whole chunk into `(offset, instruction)` pairs.
/// The chunk's constant pool is consulted to size `Closure`'s
/// trailing upvalue records.
/// Expects well-formed bytecode; a truncated stream ends the walk early.
pub fn read(chunk: &Chunk) -> Vec<(usize, Inst)> {
    let mut out = vec![];
    let mut offset = 0;

    while offset < chunk.code.len() {
        let start = offset;
        match decode_at(chunk, &mut offset) {
            Some(inst) => out.push((start, inst)),
            None => break,
        }
    }

    out
}

fn decode_at(chunk: &Chunk, offset: &mut usize) -> Option<Inst> {
    let code = &chunk.code;

    let mut byte = || -> Option<u8> {
        let b = code.get(*offset).copied();
        *offset += 1;
        b
    };
    macro_rules! wide {
        () => {{
            let hi = byte()?;
            let lo = byte()?;
            u16::from_be_bytes([hi, lo])
        }};
    }

    let opcode = Opcode::from_byte(byte()?);
    let inst = match opcode {
        Opcode::Constant => Inst::Constant(byte()? as u16),
        Opcode::ConstantLong => Inst::Constant(wide!()),
        Opcode::Nil => Inst::Nil,
        Opcode::True => Inst::True,
        Opcode::False => Inst::False,
        Opcode::Pop => Inst::Pop,
        Opcode::PopN => Inst::PopN(byte()?),
        Opcode::GetLocal => Inst::GetLocal(byte()? as u16),
        Opcode::GetLocalLong => Inst::GetLocal(wide!()),
        Opcode::SetLocal => Inst::SetLocal(byte()? as u16),
        Opcode::SetLocalLong => Inst::SetLocal(wide!()),
        Opcode::GetGlobal => Inst::GetGlobal(byte()? as u16),
        Opcode::GetGlobalLong => Inst::GetGlobal(wide!()),
        Opcode::DefineGlobal => Inst::DefineGlobal(byte()? as u16),
        Opcode::DefineGlobalLong => Inst::DefineGlobal(wide!()),
        Opcode::SetGlobal => Inst::SetGlobal(byte()? as u16),
        Opcode::SetGlobalLong => Inst::SetGlobal(wide!()),
        Opcode::GetUpvalue => Inst::GetUpvalue(byte()? as u16),
        Opcode::GetUpvalueLong => Inst::GetUpvalue(wide!()),
        Opcode::SetUpvalue => Inst::SetUpvalue(byte()? as u16),
        Opcode::SetUpvalueLong => Inst::SetUpvalue(wide!()),
        Opcode::CloseUpvalue => Inst::CloseUpvalue,
        Opcode::Equal => Inst::Equal,
        Opcode::NotEqual => Inst::NotEqual,
        Opcode::Greater => Inst::Greater,
        Opcode::GreaterEqual => Inst::GreaterEqual,
        Opcode::Less => Inst::Less,
        Opcode::LessEqual => Inst::LessEqual,
        Opcode::Add => Inst::Add,
        Opcode::Subtract => Inst::Subtract,
        Opcode::Multiply => Inst::Multiply,
        Opcode::Divide => Inst::Divide,
        Opcode::Not => Inst::Not,
        Opcode::Negate => Inst::Negate,
        Opcode::Print => Inst::Print,
        Opcode::Jump => Inst::Jump(wide!()),
        Opcode::JumpIfTrue => Inst::JumpIfTrue(wide!()),
        Opcode::JumpIfFalse => Inst::JumpIfFalse(wide!()),
        Opcode::Loop => Inst::Loop(wide!()),
        Opcode::Call => Inst::Call(byte()?),
        Opcode::Closure | Opcode::ClosureLong => {
            let index = if opcode == Opcode::Closure {
                byte()? as u16
            } else {
                wide!()
            };

            let count = match chunk.constants.get(index as usize) {
                Some(Value::Object(Obj::Function(function))) => function.upvalues,
                _ => 0,
            };

            let mut upvalues = Vec::with_capacity(count);
            for _ in 0..count {
                let is_local = byte()? == 1;
                upvalues.push((is_local, wide!()));
            }

            Inst::Closure { index, upvalues }
        }
        Opcode::Return => Inst::Return,
    };

    Some(inst)
}

/// Dump a chunk as a human-readable listing, for inspection:
///
/// ```plain
/// == script ==
/// 0000    1 Constant 0 '1'
/// 0002    | Print
/// 0003    2 Return
/// ```
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);

    let mut last_line = None;
    for (offset, inst) in read(chunk) {
        let line = chunk.line(offset);
        if last_line == Some(line) {
            let _ = write!(out, "{:04}    | ", offset);
        } else {
            let _ = write!(out, "{:04} {:4} ", offset, line);
        }
        last_line = Some(line);

        let _ = writeln!(out, "{}", render(&inst, chunk));
    }

    out
}

/// One listing row: the instruction, plus the constant it refers to.
fn render(inst: &Inst, chunk: &Chunk) -> String {
    let preview = |index: &u16| -> String {
        match chunk.constants.get(*index as usize) {
            Some(value) => value.to_string(),
            None => "<bad constant>".to_string(),
        }
    };

    match inst {
        Inst::Constant(index) => format!("Constant {} '{}'", index, preview(index)),
        Inst::GetGlobal(index) => format!("GetGlobal {} '{}'", index, preview(index)),
        Inst::DefineGlobal(index) => format!("DefineGlobal {} '{}'", index, preview(index)),
        Inst::SetGlobal(index) => format!("SetGlobal {} '{}'", index, preview(index)),
        Inst::Closure { index, upvalues } => {
            let mut row = format!("Closure {} '{}'", index, preview(index));
            for (is_local, up) in upvalues {
                row.push_str(&format!(
                    "\n        |   {} {}",
                    if *is_local { "local" } else { "upvalue" },
                    up,
                ));
            }
            row
        }
        other => format!("{:?}", other),
    }
}
