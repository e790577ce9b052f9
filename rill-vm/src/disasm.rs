// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Textual bytecode listings.

use std::fmt::Write;

use crate::builtins::BuiltinRegistry;
use crate::chunk::{Chunk, Constant, Module, Prototype};
use crate::opcode::{Op, is_builtin_opcode};

/// Render every function of a module, in declaration order.
pub fn disassemble_module(module: &Module, builtins: &BuiltinRegistry) -> String {
    let mut out = String::new();
    for (name, proto) in &module.functions {
        disassemble_proto(&mut out, name, proto, builtins);
    }
    out
}

/// Render one chunk under a heading.
pub fn disassemble_chunk(chunk: &Chunk, name: &str, builtins: &BuiltinRegistry) -> String {
    let mut out = String::new();
    write_chunk(&mut out, chunk, name, builtins);
    out
}

/// The byte offsets at which instructions start, in order. The final entry
/// is the chunk length, so every well-formed jump target appears here.
pub fn instruction_boundaries(chunk: &Chunk, builtins: &BuiltinRegistry) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut offset = 0;
    while offset < chunk.code.len() {
        offsets.push(offset);
        offset += instruction_len(chunk, offset, builtins);
    }
    offsets.push(chunk.code.len());
    offsets
}

fn disassemble_proto(out: &mut String, name: &str, proto: &Prototype, builtins: &BuiltinRegistry) {
    let heading = if name.is_empty() { "<anonymous>" } else { name };
    let _ = writeln!(
        out,
        "== {} (params: {}, locals: {}, upvalues: {}) ==",
        heading, proto.num_params, proto.max_locals, proto.upvalues.len()
    );
    write_chunk(out, &proto.chunk, heading, builtins);
    // Nested prototypes follow their parent.
    for constant in &proto.chunk.consts {
        if let Constant::Proto(inner) = constant {
            disassemble_proto(out, &inner.name, inner, builtins);
        }
    }
}

fn write_chunk(out: &mut String, chunk: &Chunk, _name: &str, builtins: &BuiltinRegistry) {
    let mut offset = 0;
    let mut last_line = 0;
    while offset < chunk.code.len() {
        let line = chunk.line_for_offset(offset);
        if line == last_line {
            let _ = write!(out, "{offset:04}    | ");
        } else {
            let _ = write!(out, "{offset:04} {line:4} ");
            last_line = line;
        }
        offset = write_instruction(out, chunk, offset, builtins);
    }
}

fn write_instruction(
    out: &mut String,
    chunk: &Chunk,
    offset: usize,
    builtins: &BuiltinRegistry,
) -> usize {
    let byte = chunk.code[offset];

    if is_builtin_opcode(byte) {
        match builtins.by_opcode(byte) {
            Some(spec) => {
                let _ = writeln!(out, "BUILTIN {} (0x{byte:02X}, arity {})", spec.name, spec.arity);
            }
            None => {
                let _ = writeln!(out, "BUILTIN 0x{byte:02X} (unregistered)");
            }
        }
        return offset + 1;
    }

    let Some(op) = Op::from_byte(byte) else {
        let _ = writeln!(out, "UNKNOWN 0x{byte:02X}");
        return offset + 1;
    };

    match op {
        Op::Const => {
            let index = chunk.read_u16(offset + 1) as usize;
            let _ = writeln!(out, "{} {} {}", op.name(), index, describe_const(chunk, index));
            offset + 3
        }
        Op::GetGlobal
        | Op::SetGlobal
        | Op::DefineGlobal
        | Op::GetProp
        | Op::SetProp => {
            let index = chunk.read_u16(offset + 1) as usize;
            let _ = writeln!(out, "{} {} {}", op.name(), index, describe_const(chunk, index));
            offset + 3
        }
        Op::Array | Op::Object => {
            let count = chunk.read_u16(offset + 1);
            let _ = writeln!(out, "{} {count}", op.name());
            offset + 3
        }
        Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue | Op::IterNext => {
            let target = chunk.read_u16(offset + 1);
            let _ = writeln!(out, "{} -> {target}", op.name());
            offset + 3
        }
        Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue | Op::Call => {
            let operand = chunk.code[offset + 1];
            let _ = writeln!(out, "{} {operand}", op.name());
            offset + 2
        }
        Op::Closure => {
            let index = chunk.read_u16(offset + 1) as usize;
            let upcount = chunk.code[offset + 3] as usize;
            let _ = write!(out, "{} {} (upvalues:", op.name(), index);
            for i in 0..upcount {
                let is_local = chunk.code[offset + 4 + i * 2];
                let slot = chunk.code[offset + 5 + i * 2];
                let kind = if is_local == 1 { "local" } else { "upvalue" };
                let _ = write!(out, " {kind} {slot}");
            }
            let _ = writeln!(out, ")");
            offset + 4 + upcount * 2
        }
        _ => {
            let _ = writeln!(out, "{}", op.name());
            offset + 1
        }
    }
}

fn instruction_len(chunk: &Chunk, offset: usize, _builtins: &BuiltinRegistry) -> usize {
    let byte = chunk.code[offset];
    if is_builtin_opcode(byte) {
        return 1;
    }
    let Some(op) = Op::from_byte(byte) else {
        return 1;
    };
    match op {
        Op::Const
        | Op::GetGlobal
        | Op::SetGlobal
        | Op::DefineGlobal
        | Op::GetProp
        | Op::SetProp
        | Op::Array
        | Op::Object
        | Op::Jump
        | Op::JumpIfFalse
        | Op::JumpIfTrue
        | Op::IterNext => 3,
        Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue | Op::Call => 2,
        Op::Closure => {
            let upcount = chunk.code[offset + 3] as usize;
            4 + upcount * 2
        }
        _ => 1,
    }
}

fn describe_const(chunk: &Chunk, index: usize) -> String {
    match chunk.consts.get(index) {
        Some(Constant::Null) => "null".to_string(),
        Some(Constant::Bool(b)) => b.to_string(),
        Some(Constant::Number(n)) => n.to_string(),
        Some(Constant::Str(s)) => format!("{s:?}"),
        Some(Constant::Proto(proto)) => {
            if proto.name.is_empty() {
                "<fn>".to_string()
            } else {
                format!("<fn {}>", proto.name)
            }
        }
        None => "<bad const>".to_string(),
    }
}
