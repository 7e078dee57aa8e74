// Embedded smoke tests behind the --tests flag. These poke the chunk
// encoder, the disassembler and the VM with hand-assembled programs, then
// run a few source snippets end to end. They print their output rather
// than asserting, so a human can eyeball a broken build quickly.

use crate::chunk::{Chunk, OpCode, MIN_SIZE_TO_CONSTANT_LONG};
use crate::config::Config;
use crate::debug;
use crate::value::Value;
use crate::vm::{InterpretResult, Vm};

fn test_chunk_return() {
    let mut chunk = Chunk::new();
    chunk.write_op(OpCode::Nil, 123, 12);
    chunk.write_op(OpCode::Return, 123, 12);
    debug::disassemble_chunk(&chunk, "test return");
}

fn test_chunk_constants() {
    let mut chunk = Chunk::new();
    chunk.write_constant(Value::Double(3.14159265), 123, 12);
    chunk.write_constant(Value::Double(2.0 * 3.14159265), 123, 12);
    chunk.write_constant(Value::Double(3.0 * 3.14159265), 123, 12);
    chunk.write_op(OpCode::Return, 123, 12);
    debug::disassemble_chunk(&chunk, "test constants");
}

fn test_long_constants() {
    let mut chunk = Chunk::new();
    for i in 0..MIN_SIZE_TO_CONSTANT_LONG + 1 {
        chunk.write_constant(Value::Double(i as f64 + 3.14159265), 123, 12);
    }
    chunk.write_op(OpCode::Return, 123, 12);
    debug::disassemble_chunk(
        &chunk,
        "test many constants (expect OP_CONSTANT_LONG at the end)",
    );
}

fn test_run_arithmetic(config: &Config) {
    let mut chunk = Chunk::new();
    for op in [OpCode::Add, OpCode::Sub, OpCode::Mul, OpCode::Div] {
        chunk.write_constant(Value::Double(3.14159265), 122, 11);
        chunk.write_constant(Value::Double(3.14159265), 122, 11);
        chunk.write_op(op, 123, 12);
        chunk.write_op(OpCode::Print, 123, 12);
    }
    chunk.write_op(OpCode::Nil, 124, 0);
    chunk.write_op(OpCode::Return, 124, 0);
    let mut vm = Vm::new(config);
    let result = vm.interpret_chunk(chunk);
    println!("execution result: {:?}", result);
}

fn test_run_sources(config: &Config) {
    let cases = [
        "print 1 + 2 * 3;",
        "var s = 0; for (var i = 0; i < 10; i = i + 1) s = s + i; print s;",
        "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);",
        "var m = {\"a\": 1, \"b\": 2}; print m[\"a\"] + m[\"b\"];",
        "var a = [10, 20, 30, 40]; print a[1:3];",
    ];
    for source in &cases {
        let mut vm = Vm::new(config);
        let result = vm.interpret_source(source);
        if result != InterpretResult::Ok {
            println!("FAILED ({:?}): {}", result, source);
        }
    }
}

pub fn run_all(config: &Config) {
    test_chunk_return();
    test_chunk_constants();
    test_long_constants();
    test_run_arithmetic(config);
    test_run_sources(config);
    println!("self tests done");
}
