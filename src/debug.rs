// Disassembler. Used by the --dis flag and by the live execution trace.

use crate::chunk::{Chunk, OpCode, SIZE_OF_24BIT_ARGS};
use std::convert::TryFrom;
use std::io::{self, Write};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = write_chunk(chunk, name, &mut out);
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_instruction(chunk, offset, &mut out).unwrap_or(offset + 1)
}

pub fn write_chunk(chunk: &Chunk, name: &str, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "== {} ==", name)?;
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = write_instruction(chunk, offset, out)?;
    }
    Ok(())
}

fn read_24bits(chunk: &Chunk, offset: usize) -> usize {
    chunk.code[offset] as usize
        | (chunk.code[offset + 1] as usize) << 8
        | (chunk.code[offset + 2] as usize) << 16
}

fn simple(name: &str, offset: usize, out: &mut dyn Write) -> io::Result<usize> {
    writeln!(out, "{}", name)?;
    Ok(offset + 1)
}

fn byte_operand(name: &str, chunk: &Chunk, offset: usize, out: &mut dyn Write) -> io::Result<usize> {
    let slot = chunk.code[offset + 1];
    writeln!(out, "{:<16} {:4}", name, slot)?;
    Ok(offset + 2)
}

fn long_operand(name: &str, chunk: &Chunk, offset: usize, out: &mut dyn Write) -> io::Result<usize> {
    let slot = read_24bits(chunk, offset + 1);
    writeln!(out, "{:<16} {:4}", name, slot)?;
    Ok(offset + 4)
}

fn constant(name: &str, chunk: &Chunk, offset: usize, out: &mut dyn Write) -> io::Result<usize> {
    let index = chunk.code[offset + 1] as usize;
    writeln!(out, "{:<16} {:4} '{}'", name, index, chunk.constants[index])?;
    Ok(offset + 2)
}

fn constant_long(
    name: &str,
    chunk: &Chunk,
    offset: usize,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let index = read_24bits(chunk, offset + 1);
    writeln!(out, "{:<16} {:4} '{}'", name, index, chunk.constants[index])?;
    Ok(offset + 4)
}

fn jump(
    name: &str,
    sign: i64,
    chunk: &Chunk,
    offset: usize,
    out: &mut dyn Write,
) -> io::Result<usize> {
    let distance = read_24bits(chunk, offset + 1) as i64;
    let target = offset as i64 + SIZE_OF_24BIT_ARGS as i64 + 1 + sign * distance;
    writeln!(out, "{:<16} {:4} -> {}", name, offset, target)?;
    Ok(offset + 4)
}

pub fn write_instruction(chunk: &Chunk, offset: usize, out: &mut dyn Write) -> io::Result<usize> {
    write!(out, "{:04} ", offset)?;
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        write!(out, "   | ")?;
    } else {
        write!(out, "{:4} ", chunk.lines[offset])?;
    }
    let byte = chunk.code[offset];
    let op = match OpCode::try_from(byte) {
        Ok(op) => op,
        Err(_) => {
            writeln!(out, "unknown opcode {}", byte)?;
            return Ok(offset + 1);
        }
    };
    use OpCode::*;
    match op {
        Invalid => simple("OP_INVALID", offset, out),
        Return => simple("OP_RETURN", offset, out),
        Print => simple("OP_PRINT", offset, out),
        Pop => simple("OP_POP", offset, out),
        Swap => simple("OP_SWAP", offset, out),
        DefineGlobal => constant("OP_DEFINE_GLOBAL", chunk, offset, out),
        DefineGlobalLong => constant_long("OP_DEFINE_GLOBAL_LONG", chunk, offset, out),
        GetGlobal => constant("OP_GET_GLOBAL", chunk, offset, out),
        GetGlobalLong => constant_long("OP_GET_GLOBAL_LONG", chunk, offset, out),
        SetGlobal => constant("OP_SET_GLOBAL", chunk, offset, out),
        SetGlobalLong => constant_long("OP_SET_GLOBAL_LONG", chunk, offset, out),
        GetLocal => byte_operand("OP_GET_LOCAL", chunk, offset, out),
        GetLocalLong => long_operand("OP_GET_LOCAL_LONG", chunk, offset, out),
        SetLocal => byte_operand("OP_SET_LOCAL", chunk, offset, out),
        SetLocalLong => long_operand("OP_SET_LOCAL_LONG", chunk, offset, out),
        JumpIfFalse => jump("OP_JUMP_IF_FALSE", 1, chunk, offset, out),
        Jump => jump("OP_JUMP", 1, chunk, offset, out),
        NegJump => jump("OP_NEG_JUMP", -1, chunk, offset, out),
        Call => byte_operand("OP_CALL", chunk, offset, out),
        Constant => constant("OP_CONSTANT", chunk, offset, out),
        ConstantLong => constant_long("OP_CONSTANT_LONG", chunk, offset, out),
        Nil => simple("OP_NIL", offset, out),
        True => simple("OP_TRUE", offset, out),
        False => simple("OP_FALSE", offset, out),
        Nan => simple("OP_NAN", offset, out),
        Inf => simple("OP_INF", offset, out),
        Neg => simple("OP_NEG", offset, out),
        Add => simple("OP_ADD", offset, out),
        Sub => simple("OP_SUB", offset, out),
        Mul => simple("OP_MUL", offset, out),
        Div => simple("OP_DIV", offset, out),
        Remainder => simple("OP_REMAINDER", offset, out),
        Exp => simple("OP_EXP", offset, out),
        BitAnd => simple("OP_BITAND", offset, out),
        BitOr => simple("OP_BITOR", offset, out),
        BitXor => simple("OP_BITXOR", offset, out),
        BitNeg => simple("OP_BITNEG", offset, out),
        LeftShift => simple("OP_LEFT_SHIFT", offset, out),
        RightShift => simple("OP_RIGHT_SHIFT", offset, out),
        Size => simple("OP_SIZE", offset, out),
        Not => simple("OP_NOT", offset, out),
        Equal => simple("OP_EQUAL", offset, out),
        Greater => simple("OP_GREATER", offset, out),
        Less => simple("OP_LESS", offset, out),
        InitArray => simple("OP_INIT_ARRAY", offset, out),
        InsertArray => simple("OP_INSERT_ARRAY", offset, out),
        InitHashmap => simple("OP_INIT_HASHMAP", offset, out),
        InsertHashmap => simple("OP_INSERT_HASHMAP", offset, out),
        Subscript => simple("OP_SUBSCRIPT", offset, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn dump(chunk: &Chunk) -> String {
        let mut out = Vec::new();
        write_chunk(chunk, "test", &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_simple_and_constant() {
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Int(7), 1, 0);
        chunk.write_op(OpCode::Return, 1, 0);
        let text = dump(&chunk);
        assert!(text.contains("== test =="));
        assert!(text.contains("OP_CONSTANT"));
        assert!(text.contains("'7'"));
        assert!(text.contains("OP_RETURN"));
        // Same line as the previous instruction collapses to a pipe
        assert!(text.contains("   | "));
    }

    #[test]
    fn test_jump_target() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, 1, 0);
        chunk.write_24bit(2, 1, 0);
        chunk.write_op(OpCode::Nil, 2, 0);
        chunk.write_op(OpCode::Nil, 2, 0);
        let text = dump(&chunk);
        // Jump at offset 0, operand 2: lands at 0 + 4 + 2 = 6
        assert!(text.contains("OP_JUMP"));
        assert!(text.contains("0 -> 6"));
    }

    #[test]
    fn test_disassembly_is_stable() {
        let mut a = Chunk::new();
        let mut b = Chunk::new();
        for chunk in [&mut a, &mut b] {
            chunk.write_constant(Value::Double(3.5), 10, 2);
            chunk.write_op(OpCode::Neg, 10, 4);
            chunk.write_op(OpCode::Print, 11, 0);
        }
        assert_eq!(dump(&a), dump(&b));
    }
}
