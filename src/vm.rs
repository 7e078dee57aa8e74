// (C) 2026 Brandon Lewis
//
// The bytecode virtual machine: a stack machine with call frames over the
// chunks the compiler emits.
//
// *Execution model*
//
// Each call pushes a CallFrame whose slots index is the base of the
// callee's window into the shared value stack; slot zero holds the callee
// itself and the parameters follow. Globals live in an open-addressed
// hashmap keyed by interned name. Every statement leaves the operand stack
// exactly as it found it.
//
// *Errors*
//
// Runtime errors reset the operand stack and surface as
// InterpretResult::RuntimeError after printing the diagnostic and a
// per-frame backtrace. The one deliberate exception is division by zero,
// which only logs and pushes +Infinity, then keeps running.

use crate::chunk::{Chunk, OpCode};
use crate::compiler::compile;
use crate::config::Config;
use crate::debug;
use crate::hashmap::Hashmap;
use crate::object::{Function, Interner, Native, NativeFn, Str, StrView};
use crate::stdlib;
use crate::value::{describe_set, TypeSet, TypeTag, Value};
use std::convert::TryFrom;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

pub const FRAMES_MAX: usize = 256;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    StackOverflow,
    StackUnderflow,
    Type { expect: TypeSet, got: TypeTag },
    UndefinedVariable(String),
    IndexOutOfBounds { what: &'static str, index: i32 },
    ArityMismatch { name: String, expected: i32, got: usize },
    NotCallable,
    Message(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::StackOverflow => write!(f, "Stack overflow."),
            RuntimeError::StackUnderflow => write!(f, "Stack underflow."),
            RuntimeError::Type { expect, got } => {
                write!(f, "Expected {} but got {}.", describe_set(*expect), got)
            }
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeError::IndexOutOfBounds { what, index } => {
                write!(f, "{} index {} out of bounds", what, index)
            }
            RuntimeError::ArityMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "{}() expected {} arguments but got {}.",
                name, expected, got
            ),
            RuntimeError::NotCallable => write!(f, "Can only call functions and classes."),
            RuntimeError::Message(text) => write!(f, "{}", text),
        }
    }
}

// Construct a type error from the offending value.
pub fn expected(expect: TypeSet, got: &Value) -> RuntimeError {
    RuntimeError::Type {
        expect,
        got: got.type_tag(),
    }
}

fn numeric_set() -> TypeSet {
    TypeTag::Bool | TypeTag::Int | TypeTag::Double | TypeTag::Complex
}

struct CallFrame {
    function: Rc<Function>,
    ip: usize,
    slots: usize,
}

pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Hashmap,
    strings: Interner,
    out: Box<dyn Write>,
    trace: bool,
    frames_max: usize,
    stack_max: usize,
}

impl Vm {
    pub fn new(config: &Config) -> Vm {
        Vm::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: &Config, out: Box<dyn Write>) -> Vm {
        let mut vm = Vm {
            frames: Vec::new(),
            stack: Vec::new(),
            globals: Hashmap::new(512),
            strings: Interner::new(),
            out,
            trace: config.debug_trace,
            frames_max: config.frames_max,
            stack_max: config.stack_max,
        };
        stdlib::install(&mut vm);
        vm
    }

    pub fn strings_mut(&mut self) -> &mut Interner {
        &mut self.strings
    }

    pub fn intern(&mut self, text: &str) -> Rc<Str> {
        self.strings.intern(text)
    }

    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    // Natives never displace an existing global.
    pub fn define_native(&mut self, name: &str, arity: i32, function: NativeFn) {
        let name = self.strings.intern(name);
        let native = Value::Native(Rc::new(Native {
            name: name.clone(),
            arity,
            function,
        }));
        self.globals.add(Value::Str(name), native);
    }

    pub fn define_constant(&mut self, name: &str, value: Value) {
        let name = self.strings.intern(name);
        self.globals.add(Value::Str(name), value);
    }

    pub fn globals_snapshot(&self) -> Hashmap {
        self.globals.clone()
    }

    // Source position of the instruction being executed, for the position
    // natives.
    pub fn current_position(&self) -> (u32, u32) {
        match self.frames.last() {
            Some(frame) => {
                let chunk = &frame.function.chunk;
                if chunk.lines.is_empty() {
                    (0, 0)
                } else {
                    let at = frame.ip.saturating_sub(1).min(chunk.lines.len() - 1);
                    (chunk.lines[at], chunk.columns[at])
                }
            }
            None => (0, 0),
        }
    }

    // ---- interpretation entry points --------------------------------

    pub fn interpret_source(&mut self, source: &str) -> InterpretResult {
        let function = match compile(source, &mut self.strings, self.trace) {
            Some(function) => function,
            None => return InterpretResult::CompileError,
        };
        self.run_function(function)
    }

    pub fn interpret_chunk(&mut self, chunk: Chunk) -> InterpretResult {
        let name = self.strings.intern("interpretChunk");
        let function = Function {
            name,
            arity: 0,
            chunk,
        };
        self.run_function(function)
    }

    pub fn run_function(&mut self, function: Function) -> InterpretResult {
        let function = Rc::new(function);
        self.stack.clear();
        self.frames.clear();
        let outcome = self
            .push(Value::Function(function.clone()))
            .and_then(|_| self.call(function, 0))
            .and_then(|_| self.run());
        match outcome {
            Ok(()) => InterpretResult::Ok,
            Err(error) => {
                self.report(&error);
                self.reset_stack();
                InterpretResult::RuntimeError
            }
        }
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    fn report(&mut self, error: &RuntimeError) {
        eprintln!("ERROR: {}", error);
        if let RuntimeError::UndefinedVariable(_) = error {
            let names: Vec<String> = self.globals.iter().map(|(k, _)| k.to_string()).collect();
            eprintln!("Did you mean one of: {}", names.join(" "));
        }
        for frame in self.frames.iter().rev() {
            let chunk = &frame.function.chunk;
            if chunk.lines.is_empty() {
                continue;
            }
            let at = frame.ip.saturating_sub(1).min(chunk.lines.len() - 1);
            eprintln!(
                "    [{}:{}] in {}",
                chunk.lines[at], chunk.columns[at], frame.function.name.chars
            );
        }
    }

    // ---- stack primitives -------------------------------------------

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.stack_max {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i32, RuntimeError> {
        let value = self.pop()?;
        value
            .coerce_int()
            .ok_or_else(|| expected(TypeTag::Bool | TypeTag::Int | TypeTag::Double, &value))
    }

    fn pop_double(&mut self) -> Result<f64, RuntimeError> {
        let value = self.pop()?;
        value
            .coerce_double()
            .ok_or_else(|| expected(TypeTag::Bool | TypeTag::Int | TypeTag::Double, &value))
    }

    fn peek(&self, offset: usize) -> Result<&Value, RuntimeError> {
        if self.stack.len() > offset {
            Ok(&self.stack[self.stack.len() - 1 - offset])
        } else {
            Err(RuntimeError::StackUnderflow)
        }
    }

    // ---- frame plumbing ---------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_24bits(&mut self) -> usize {
        let lo = self.read_byte() as usize;
        let mid = self.read_byte() as usize;
        let hi = self.read_byte() as usize;
        lo | mid << 8 | hi << 16
    }

    fn read_constant(&mut self, long: bool) -> Value {
        let index = if long {
            self.read_24bits()
        } else {
            self.read_byte() as usize
        };
        let frame = self.frames.last().unwrap();
        frame.function.chunk.constants[index].clone()
    }

    fn frame_slots(&self) -> usize {
        self.frames.last().unwrap().slots
    }

    // ---- calls ------------------------------------------------------

    fn call(&mut self, function: Rc<Function>, arg_count: usize) -> Result<(), RuntimeError> {
        if function.arity != arg_count {
            return Err(RuntimeError::ArityMismatch {
                name: function.name.chars.to_string(),
                expected: function.arity as i32,
                got: arg_count,
            });
        }
        if self.frames.len() == self.frames_max {
            return Err(RuntimeError::StackOverflow);
        }
        let slots = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slots,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        match callee {
            Value::Function(function) => self.call(function, arg_count),
            Value::Native(native) => {
                if native.arity >= 0 && native.arity as usize != arg_count {
                    return Err(RuntimeError::ArityMismatch {
                        name: native.name.chars.to_string(),
                        expected: native.arity,
                        got: arg_count,
                    });
                }
                let base = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[base..].to_vec();
                let result = (native.function)(self, &args)?;
                // Drop the arguments and the callee
                self.stack.truncate(base - 1);
                self.push(result)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    // ---- arithmetic -------------------------------------------------

    fn arith(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = arith_values(&a, &b, op)?;
        self.push(result)
    }

    // ---- subscript and slicing --------------------------------------

    fn subscript(&mut self, key: Value) -> Result<(), RuntimeError> {
        if let Value::Array(bounds) = &key {
            let bounds = bounds.borrow().clone();
            return self.slice(&bounds);
        }
        if matches!(self.peek(0)?, Value::Map(_)) {
            if let Value::Map(map) = self.pop()? {
                let value = map.borrow().get(&key).unwrap_or(Value::Nil);
                return self.push(value);
            }
            unreachable!();
        }
        let index = match key {
            Value::Int(i) => i,
            _ => {
                return Err(RuntimeError::Message(
                    "Array index must be an integer or a slice".to_string(),
                ))
            }
        };
        let target = self.pop()?;
        match &target {
            Value::Str(_) | Value::View(_) => {
                let text = target.string_slice().unwrap();
                let length = text.len() as i32;
                let mut i = index;
                if i < 0 {
                    i += length;
                }
                if i < 0 || i >= length {
                    return Err(RuntimeError::IndexOutOfBounds {
                        what: "String",
                        index: i,
                    });
                }
                let one = char_at_byte(text, i as usize).to_string();
                let interned = self.intern(&one);
                self.push(Value::Str(interned))
            }
            Value::Array(values) => {
                let length = values.borrow().len() as i32;
                let mut i = index;
                if i < 0 {
                    i += length;
                }
                if i < 0 || i >= length {
                    return Err(RuntimeError::IndexOutOfBounds {
                        what: "Array",
                        index: i,
                    });
                }
                let value = values.borrow()[i as usize].clone();
                self.push(value)
            }
            _ => Err(RuntimeError::Message(
                "Indexing into a non-array, non-string, non-hashmap value".to_string(),
            )),
        }
    }

    // The slice key is a transient array of 0, 1 or 2 integer bounds.
    // Defaults are [0, length); negatives wrap once; the end clamps to the
    // length and an inverted range collapses to empty.
    fn slice(&mut self, bounds: &[Value]) -> Result<(), RuntimeError> {
        if bounds.len() > 2 {
            return Err(RuntimeError::Message(
                "Cannot slice with more than two indices".to_string(),
            ));
        }
        let mut ints = [None, None];
        for (i, bound) in bounds.iter().enumerate() {
            match bound {
                Value::Int(n) => ints[i] = Some(*n),
                _ => {
                    return Err(RuntimeError::Message(
                        "Array index must be an integer or a slice".to_string(),
                    ))
                }
            }
        }
        let target = self.pop()?;
        match &target {
            Value::Str(_) | Value::View(_) => {
                let (base, offset, text_len) = match &target {
                    Value::Str(s) => (s.clone(), 0, s.len()),
                    Value::View(v) => (v.base.clone(), v.start, v.len),
                    _ => unreachable!(),
                };
                let (start, end) = slice_range(ints, text_len);
                let mut abs_start = offset + start;
                let mut abs_end = offset + end;
                // Keep the window on character boundaries
                while abs_start > 0 && !base.chars.is_char_boundary(abs_start) {
                    abs_start -= 1;
                }
                while abs_end > abs_start && !base.chars.is_char_boundary(abs_end) {
                    abs_end -= 1;
                }
                self.push(Value::View(Rc::new(StrView {
                    base,
                    start: abs_start,
                    len: abs_end - abs_start,
                })))
            }
            Value::Array(values) => {
                let (start, end) = slice_range(ints, values.borrow().len());
                let sliced = values.borrow()[start..end].to_vec();
                self.push(Value::array(sliced))
            }
            Value::Map(_) => Err(RuntimeError::Message(
                "Cannot slice into hashmap yet".to_string(),
            )),
            _ => Err(RuntimeError::Message(
                "Indexing into a non-array, non-string, non-hashmap value".to_string(),
            )),
        }
    }

    // ---- concatenation ----------------------------------------------

    fn concatenate_strings(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let mut text = String::with_capacity(
            a.string_slice().map_or(0, str::len) + b.string_slice().map_or(0, str::len),
        );
        text.push_str(a.string_slice().unwrap());
        text.push_str(b.string_slice().unwrap());
        let interned = self.intern(&text);
        self.push(Value::Str(interned))
    }

    fn concatenate_arrays(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        if let (Value::Array(a), Value::Array(b)) = (&a, &b) {
            let mut joined = a.borrow().clone();
            joined.extend(b.borrow().iter().cloned());
            self.push(Value::array(joined))
        } else {
            unreachable!()
        }
    }

    // ---- execution trace --------------------------------------------

    fn trace_instruction(&self) {
        print!("[ ");
        for (i, value) in self.stack.iter().enumerate() {
            print!("{}", value);
            if i + 1 < self.stack.len() {
                print!(" ");
            }
        }
        println!(" ]");
        if let Some(frame) = self.frames.last() {
            debug::disassemble_instruction(&frame.function.chunk, frame.ip);
        }
    }

    // ---- the interpreter loop ---------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.trace {
                self.trace_instruction();
            }
            let byte = self.read_byte();
            let op = OpCode::try_from(byte)
                .map_err(|b| RuntimeError::Message(format!("Unknown instruction {}!", b)))?;
            match op {
                OpCode::Invalid => {
                    return Err(RuntimeError::Message(
                        "Unexpected null instruction!".to_string(),
                    ))
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
                    if self.frames.is_empty() {
                        // Top level: discard the script function and halt
                        self.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
                OpCode::Print => {
                    if !self.stack.is_empty() {
                        let value = self.pop()?;
                        let _ = writeln!(self.out, "{}", value);
                    }
                }
                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count)?.clone();
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Subscript => {
                    let key = self.pop()?;
                    self.subscript(key)?;
                }
                OpCode::Swap => {
                    let len = self.stack.len();
                    if len >= 2 {
                        self.stack.swap(len - 1, len - 2);
                    }
                }
                OpCode::Pop => {
                    if !self.stack.is_empty() {
                        self.pop()?;
                    }
                }
                OpCode::DefineGlobal | OpCode::DefineGlobalLong => {
                    let name = self.read_constant(op == OpCode::DefineGlobalLong);
                    let value = self.pop()?;
                    // Redefinition replaces the previous binding
                    if !self.globals.add(name.clone(), value.clone()) {
                        self.globals.set(&name, value);
                    }
                }
                OpCode::SetGlobal | OpCode::SetGlobalLong => {
                    let name = self.read_constant(op == OpCode::SetGlobalLong);
                    let value = self.peek(0)?.clone();
                    if !self.globals.set(&name, value) {
                        return Err(RuntimeError::UndefinedVariable(name.to_string()));
                    }
                }
                OpCode::GetGlobal | OpCode::GetGlobalLong => {
                    let name = self.read_constant(op == OpCode::GetGlobalLong);
                    match self.globals.get(&name) {
                        Some(value) => self.push(value)?,
                        None => return Err(RuntimeError::UndefinedVariable(name.to_string())),
                    }
                }
                OpCode::SetLocal | OpCode::SetLocalLong => {
                    let slot = if op == OpCode::SetLocal {
                        self.read_byte() as usize
                    } else {
                        self.read_24bits()
                    };
                    let value = self.peek(0)?.clone();
                    let base = self.frame_slots();
                    self.stack[base + slot] = value;
                }
                OpCode::GetLocal | OpCode::GetLocalLong => {
                    let slot = if op == OpCode::GetLocal {
                        self.read_byte() as usize
                    } else {
                        self.read_24bits()
                    };
                    let base = self.frame_slots();
                    let value = self.stack[base + slot].clone();
                    self.push(value)?;
                }
                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Jump => {
                    let offset = self.read_24bits();
                    self.frames.last_mut().unwrap().ip += offset;
                }
                OpCode::NegJump => {
                    let offset = self.read_24bits();
                    self.frames.last_mut().unwrap().ip -= offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_24bits();
                    if self.peek(0)?.is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset;
                    }
                }
                OpCode::InitArray => {
                    self.push(Value::array(Vec::with_capacity(16)))?;
                }
                OpCode::InsertArray => {
                    let value = self.pop()?;
                    match self.peek(0)? {
                        Value::Array(values) => values.borrow_mut().push(value),
                        other => return Err(expected(TypeSet::from_flag(TypeTag::Array), other)),
                    }
                }
                OpCode::InitHashmap => {
                    self.push(Value::map(Hashmap::new(8)))?;
                }
                OpCode::InsertHashmap => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    match self.peek(0)? {
                        // Insert-only: the first occurrence of a duplicate
                        // literal key wins
                        Value::Map(map) => {
                            map.borrow_mut().add(key, value);
                        }
                        other => return Err(expected(TypeSet::from_flag(TypeTag::Map), other)),
                    }
                }
                OpCode::Constant => {
                    let value = self.read_constant(false);
                    self.push(value)?;
                }
                OpCode::ConstantLong => {
                    let value = self.read_constant(true);
                    self.push(value)?;
                }
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                OpCode::BitNeg => {
                    let value = self.pop_int()?;
                    self.push(Value::Int(!value))?;
                }
                OpCode::Size => {
                    let value = self.pop()?;
                    let size = match &value {
                        Value::Str(_) | Value::View(_) => {
                            value.string_slice().unwrap().len() as i32
                        }
                        Value::Array(values) => values.borrow().len() as i32,
                        Value::Map(map) => map.borrow().len() as i32,
                        _ => std::mem::size_of::<Value>() as i32,
                    };
                    self.push(Value::Int(size))?;
                }
                OpCode::Greater | OpCode::Less => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = compare_values(&a, &b, op == OpCode::Greater)?;
                    self.push(Value::Bool(result))?;
                }
                OpCode::Add => {
                    if self.peek(0)?.is_string() || self.peek(1)?.is_string() {
                        if !(self.peek(0)?.is_string() && self.peek(1)?.is_string()) {
                            return Err(RuntimeError::Message(
                                "Strings can only be added to other strings".to_string(),
                            ));
                        }
                        self.concatenate_strings()?;
                    } else if matches!(self.peek(0)?, Value::Array(_))
                        || matches!(self.peek(1)?, Value::Array(_))
                    {
                        if !(matches!(self.peek(0)?, Value::Array(_))
                            && matches!(self.peek(1)?, Value::Array(_)))
                        {
                            return Err(RuntimeError::Message(
                                "Arrays can only be added to other arrays".to_string(),
                            ));
                        }
                        self.concatenate_arrays()?;
                    } else {
                        self.arith(OpCode::Add)?;
                    }
                }
                OpCode::Neg => {
                    // Negation is multiplication by -1 through the same
                    // widening dispatch
                    self.push(Value::Int(-1))?;
                    self.arith(OpCode::Mul)?;
                }
                OpCode::Sub => self.arith(OpCode::Sub)?,
                OpCode::Mul => self.arith(OpCode::Mul)?,
                OpCode::Div => {
                    if self.peek(0)?.is_zero() {
                        // Soft error: log, substitute infinity, keep going
                        let error = RuntimeError::Message(
                            "Ignoring division by zero! Returning infinity.".to_string(),
                        );
                        self.report(&error);
                        self.pop()?;
                        self.pop()?;
                        self.push(Value::Double(f64::INFINITY))?;
                    } else {
                        self.arith(OpCode::Div)?;
                    }
                }
                OpCode::BitAnd => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a & b))?;
                }
                OpCode::BitOr => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a | b))?;
                }
                OpCode::BitXor => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a ^ b))?;
                }
                OpCode::LeftShift => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int(a.wrapping_shl(b as u32)))?;
                }
                OpCode::RightShift => {
                    // Logical shift, on the unsigned bit pattern
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.push(Value::Int((a as u32).wrapping_shr(b as u32) as i32))?;
                }
                OpCode::Remainder => {
                    let b = self.pop_double()?;
                    let a = self.pop_double()?;
                    self.push(Value::Double(a % b))?;
                }
                OpCode::Exp => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = exp_values(&a, &b)?;
                    self.push(result)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::Inf => self.push(Value::Double(f64::INFINITY))?,
                OpCode::Nan => self.push(Value::Double(f64::NAN))?,
            }
        }
    }
}

// Heterogeneous binary arithmetic: complex if either side is complex, else
// double if either side is double, else integer (bool counts as integer).
fn arith_values(a: &Value, b: &Value, op: OpCode) -> Result<Value, RuntimeError> {
    if !a.is_numeric() {
        return Err(expected(numeric_set(), a));
    }
    if !b.is_numeric() {
        return Err(expected(numeric_set(), b));
    }
    if matches!(a, Value::Complex(_)) || matches!(b, Value::Complex(_)) {
        let x = a.coerce_complex().unwrap();
        let y = b.coerce_complex().unwrap();
        Ok(Value::Complex(match op {
            OpCode::Add => x + y,
            OpCode::Sub => x - y,
            OpCode::Mul => x * y,
            _ => x / y,
        }))
    } else if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        let x = a.coerce_double().unwrap();
        let y = b.coerce_double().unwrap();
        Ok(Value::Double(match op {
            OpCode::Add => x + y,
            OpCode::Sub => x - y,
            OpCode::Mul => x * y,
            _ => x / y,
        }))
    } else {
        let x = a.coerce_int().unwrap();
        let y = b.coerce_int().unwrap();
        Ok(Value::Int(match op {
            OpCode::Add => x.wrapping_add(y),
            OpCode::Sub => x.wrapping_sub(y),
            OpCode::Mul => x.wrapping_mul(y),
            _ => x.wrapping_div(y),
        }))
    }
}

// Exponentiation widens all the way through complex; the int and double
// cases both go through double pow.
fn exp_values(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    if matches!(a, Value::Complex(_)) || matches!(b, Value::Complex(_)) {
        let x = a
            .coerce_complex()
            .ok_or_else(|| expected(numeric_set(), a))?;
        let y = b
            .coerce_complex()
            .ok_or_else(|| expected(numeric_set(), b))?;
        return Ok(Value::Complex(x.pow(y)));
    }
    let x = a.coerce_double().ok_or_else(|| expected(numeric_set(), a))?;
    let y = b.coerce_double().ok_or_else(|| expected(numeric_set(), b))?;
    Ok(Value::Double(x.powf(y)))
}

fn compare_values(a: &Value, b: &Value, greater: bool) -> Result<bool, RuntimeError> {
    let number_set = TypeTag::Bool | TypeTag::Int | TypeTag::Double;
    if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        let x = a.coerce_double().ok_or_else(|| expected(number_set, a))?;
        let y = b.coerce_double().ok_or_else(|| expected(number_set, b))?;
        Ok(if greater { x > y } else { x < y })
    } else {
        let x = a.coerce_int().ok_or_else(|| expected(number_set, a))?;
        let y = b.coerce_int().ok_or_else(|| expected(number_set, b))?;
        Ok(if greater { x > y } else { x < y })
    }
}

fn slice_range(bounds: [Option<i32>; 2], length: usize) -> (usize, usize) {
    let length = length as i32;
    let mut start = bounds[0].unwrap_or(0);
    let mut end = bounds[1].unwrap_or(length);
    if start < 0 {
        start += length;
        if start < 0 {
            start = 0;
        }
    }
    if end < 0 {
        end += length;
        if end < 0 {
            end = 0;
        }
    }
    if end > length {
        end = length;
    }
    if start > end || start > length {
        return (0, 0);
    }
    (start as usize, end as usize)
}

// The character whose encoding covers byte position `at`.
fn char_at_byte(text: &str, mut at: usize) -> &str {
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    let rest = &text[at..];
    match rest.char_indices().nth(1) {
        Some((next, _)) => &rest[..next],
        None => rest,
    }
}

pub fn interpret(source: &str, config: &Config) -> InterpretResult {
    let mut vm = Vm::new(config);
    vm.interpret_source(source)
}

// Compile and print the bytecode without running it.
pub fn disassemble_source(source: &str, config: &Config) -> InterpretResult {
    let mut strings = Interner::new();
    match compile(source, &mut strings, config.debug_trace) {
        Some(function) => {
            debug::disassemble_chunk(&function.chunk, &function.name.chars);
            InterpretResult::Ok
        }
        None => InterpretResult::CompileError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    // print output lands in a shared buffer the test can read back.
    #[derive(Clone)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_vm(source: &str) -> (InterpretResult, String, Vm) {
        let config = Config::default();
        let buf = SharedBuf(Rc::new(RefCell::new(Vec::new())));
        let mut vm = Vm::with_output(&config, Box::new(buf.clone()));
        let result = vm.interpret_source(source);
        let text = String::from_utf8(buf.0.borrow().clone()).unwrap();
        (result, text, vm)
    }

    fn run(source: &str) -> (InterpretResult, String) {
        let (result, text, _) = run_vm(source);
        (result, text)
    }

    fn assert_prints(source: &str, expect: &str) {
        let (result, text) = run(source);
        assert_eq!(result, InterpretResult::Ok, "source: {}", source);
        assert_eq!(text, expect, "source: {}", source);
    }

    fn assert_runtime_error(source: &str) {
        let (result, _) = run(source);
        assert_eq!(result, InterpretResult::RuntimeError, "source: {}", source);
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_prints("print 1 + 2 * 3;", "7\n");
        assert_prints("print (1 + 2) * 3;", "9\n");
        assert_prints("print 7 / 2;", "3\n");
        assert_prints("print 7.0 / 2;", "3.5\n");
        assert_prints("print 2 ** 10;", "1024\n");
        assert_prints("print 7 % 3;", "1\n");
        assert_prints("print -3 + 1;", "-2\n");
        assert_prints("print +5;", "5\n");
    }

    #[test]
    fn test_bitwise() {
        assert_prints("print 6 & 3;", "2\n");
        assert_prints("print 6 | 3;", "7\n");
        assert_prints("print 6 ^ 3;", "5\n");
        assert_prints("print 1 << 4;", "16\n");
        assert_prints("print 256 >> 4;", "16\n");
        assert_prints("print ~0;", "-1\n");
        // Right shift is logical, on the unsigned bit pattern
        assert_prints("print -1 >> 28;", "15\n");
        assert_prints("print 0xff & 0x0f;", "15\n");
    }

    #[test]
    fn test_comparisons_and_equality() {
        assert_prints("print 1 < 2;", "true\n");
        assert_prints("print 2 <= 2;", "true\n");
        assert_prints("print 3 > 4;", "false\n");
        assert_prints("print 1 == 1.0;", "true\n");
        assert_prints("print 1 != 2;", "true\n");
        assert_prints("print \"a\" == \"a\";", "true\n");
        assert_prints("print nil == false;", "false\n");
        assert_prints("print true == 1;", "true\n");
    }

    #[test]
    fn test_truthiness_in_conditions() {
        assert_prints("if (0) print 1; else print 2;", "1\n");
        assert_prints("if (\"\") print 1; else print 2;", "1\n");
        assert_prints("if (nil) print 1; else print 2;", "2\n");
        assert_prints("if (false) print 1; else print 2;", "2\n");
    }

    #[test]
    fn test_short_circuit() {
        assert_prints("print true and 5;", "5\n");
        assert_prints("print nil and 1;", "nil\n");
        assert_prints("print false or \"x\";", "x\n");
        assert_prints("print 7 or 1;", "7\n");
    }

    #[test]
    fn test_string_concatenation_and_interning() {
        let (result, text, mut vm) = run_vm("var a = \"ab\"; var b = \"cd\"; print a + b;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(text, "abcd\n");
        // The concatenation result was interned during the run: interning
        // it again must not grow the table.
        let before = vm.strings_mut().len();
        vm.strings_mut().intern("abcd");
        assert_eq!(vm.strings_mut().len(), before);
    }

    #[test]
    fn test_string_plus_non_string_errors() {
        assert_runtime_error("print \"a\" + 1;");
        assert_runtime_error("print 1 + \"a\";");
    }

    #[test]
    fn test_globals_and_locals() {
        assert_prints("var x = 1; x = x + 1; print x;", "2\n");
        assert_prints("var x = 1; var x = 2; print x;", "2\n");
        assert_prints("{ var a = 1; { var a = 2; print a; } print a; }", "2\n1\n");
    }

    #[test]
    fn test_undefined_variable() {
        assert_runtime_error("print missing;");
        assert_runtime_error("missing = 1;");
    }

    #[test]
    fn test_for_loop_sum() {
        assert_prints(
            "var s = 0; for (var i = 0; i < 10; i = i + 1) s = s + i; print s;",
            "45\n",
        );
    }

    #[test]
    fn test_while_loop() {
        assert_prints(
            "var i = 0; while (i < 3) { print i; i = i + 1; }",
            "0\n1\n2\n",
        );
    }

    #[test]
    fn test_functions() {
        assert_prints(
            "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);",
            "55\n",
        );
        assert_prints(
            "fun greet(name) { return \"hi \" + name; } print greet(\"you\");",
            "hi you\n",
        );
        // Implicit nil return
        assert_prints("fun noop() {} print noop();", "nil\n");
    }

    #[test]
    fn test_call_errors() {
        assert_runtime_error("fun f(a) {} f();");
        assert_runtime_error("var x = 1; x();");
        // Unbounded recursion trips the frame limit
        assert_runtime_error("fun f() { f(); } f();");
    }

    #[test]
    fn test_compound_assignment_matches_expanded_form() {
        let cases = [
            ("+=", "+", "3"),
            ("-=", "-", "3"),
            ("*=", "*", "3"),
            ("/=", "/", "3"),
            ("%=", "%", "3"),
            ("**=", "**", "3"),
            ("&=", "&", "6"),
            ("|=", "|", "6"),
            ("^=", "^", "6"),
            ("<<=", "<<", "2"),
            (">>=", ">>", "2"),
        ];
        for (compound, plain, rhs) in &cases {
            let a = format!("var x = 9; x {} {}; print x;", compound, rhs);
            let b = format!("var x = 9; x = x {} {}; print x;", plain, rhs);
            let (ra, ta) = run(&a);
            let (rb, tb) = run(&b);
            assert_eq!(ra, InterpretResult::Ok, "source: {}", a);
            assert_eq!(ra, rb);
            assert_eq!(ta, tb, "compound {} diverged", compound);
        }
    }

    #[test]
    fn test_arrays() {
        assert_prints("print [1, 2, 3];", "[1, 2, 3]\n");
        assert_prints("print #[1, 2, 3];", "3\n");
        assert_prints("var a = [10, 20]; print a[0] + a[1];", "30\n");
        assert_prints("var a = [10, 20, 30, 40]; print a[-1];", "40\n");
        assert_prints("print [1] + [2, 3];", "[1, 2, 3]\n");
        assert_prints("print [1, 2,];", "[1, 2]\n");
    }

    #[test]
    fn test_array_errors() {
        assert_runtime_error("var a = [10, 20, 30, 40]; print a[99];");
        assert_runtime_error("var a = [1]; print a[1.5];");
        assert_runtime_error("print 5[0];");
    }

    #[test]
    fn test_slices() {
        assert_prints("var a = [10, 20, 30, 40]; print a[1:3];", "[20, 30]\n");
        assert_prints("var a = [10, 20, 30, 40]; print a[:2];", "[10, 20]\n");
        assert_prints("var a = [10, 20, 30, 40]; print a[2:];", "[30, 40]\n");
        assert_prints("var a = [10, 20, 30, 40]; print a[:];", "[10, 20, 30, 40]\n");
        assert_prints("var a = [10, 20, 30, 40]; print a[1:-1];", "[20, 30]\n");
        // end past the length clamps, inverted range is empty
        assert_prints("var a = [10, 20]; print a[1:99];", "[20]\n");
        assert_prints("var a = [10, 20]; print a[2:1];", "[]\n");
    }

    #[test]
    fn test_string_indexing_and_slicing() {
        assert_prints("print \"abc\"[1];", "b\n");
        assert_prints("print \"abc\"[-1];", "c\n");
        assert_prints("print \"hello\"[1:4];", "ell\n");
        assert_prints("print #\"hello\"[1:4];", "3\n");
        assert_prints("var s = \"hello world\"; print s[:5] + \"!\";", "hello!\n");
        assert_runtime_error("print \"abc\"[7];");
    }

    #[test]
    fn test_hashmaps() {
        assert_prints(
            "var m = {\"a\": 1, \"b\": 2}; print m[\"a\"] + m[\"b\"]; print #m;",
            "3\n2\n",
        );
        // Missing keys yield nil
        assert_prints("var m = {}; print m[\"nope\"];", "nil\n");
        // Numeric keys match across widths
        assert_prints("var m = {1: \"one\"}; print m[1.0];", "one\n");
        // First duplicate literal key wins
        assert_prints("var m = {\"k\": 1, \"k\": 2}; print m[\"k\"];", "1\n");
    }

    #[test]
    fn test_division_by_zero_is_soft() {
        assert_prints("print 1 / 0;", "inf\n");
        assert_prints("print 1 / 0; print 2;", "inf\n2\n");
        assert_prints("print 1.5 / 0.0;", "inf\n");
    }

    #[test]
    fn test_nan_and_inf_literals() {
        assert_prints("print NaN;", "nan\n");
        assert_prints("print nan;", "nan\n");
        assert_prints("print inf;", "inf\n");
        assert_prints("print Infinity;", "inf\n");
        assert_prints("print -inf;", "-inf\n");
        assert_prints("print NaN == NaN;", "false\n");
    }

    #[test]
    fn test_complex_values() {
        assert_prints("print I * I;", "(-1+0j)\n");
        assert_prints("print 1 + I;", "(1+1j)\n");
        assert_prints("print 2 * I;", "2j\n");
        assert_prints("print (1 + I) - I;", "(1+0j)\n");
    }

    #[test]
    fn test_size_of_non_containers() {
        let expect = format!("{}\n", std::mem::size_of::<Value>());
        assert_prints("print #5;", &expect);
    }

    #[test]
    fn test_statement_stack_discipline() {
        // Expression statements drain their value; reaching the final
        // print with the right answer means the stack stayed balanced.
        assert_prints("var a = 1; a + 2; [1, 2]; var m = {\"k\": a}; print a;", "1\n");
    }

    #[test]
    fn test_hex_literals() {
        assert_prints("print 0x10;", "16\n");
        assert_prints("print 0xff;", "255\n");
    }

    #[test]
    fn test_scientific_notation() {
        assert_prints("print 1e3;", "1000\n");
        assert_prints("print 2.5e-1;", "0.25\n");
    }

    #[test]
    fn test_nested_containers_print_quoted() {
        assert_prints("print [\"a\", 'it\"s'];", "[\"a\", 'it\"s']\n");
    }

    #[test]
    fn test_local_compound_assignment() {
        assert_prints("{ var a = 1; a += 2; print a; }", "3\n");
        assert_prints("{ var a = 8; a >>= 2; print a; }", "2\n");
    }

    #[test]
    fn test_functions_see_globals() {
        assert_prints(
            "var base = 10; fun bump(n) { return base + n; } print bump(5);",
            "15\n",
        );
        assert_prints(
            "var c = 0; fun inc() { c = c + 1; } inc(); inc(); print c;",
            "2\n",
        );
    }

    #[test]
    fn test_nested_calls() {
        assert_prints(
            "fun a(x) { return x + 1; } fun b(x) { return a(x) * 2; } fun c(x) { return b(x) - 3; } print c(4);",
            "7\n",
        );
    }

    #[test]
    fn test_long_operand_globals() {
        // Push the constant pool past the short-encoding threshold so the
        // later loads go through the 24-bit forms.
        let source = "\
            var a = 1; var b = 2; var c = 3; var d = 4; var e2 = 5;\n\
            var f = 6; var g = 7; var h = 8; var i = 9;\n\
            print a + b + c + d + e2 + f + g + h + i;";
        assert_prints(source, "45\n");
    }

    #[test]
    fn test_view_behaves_like_string() {
        assert_prints("print \"hello\"[0:2] == \"he\";", "true\n");
        assert_prints("var s = \"hello\"; print s[:2] + s[2:] == s;", "true\n");
        assert_prints("print \"hello\"[1:3][0];", "e\n");
        assert_prints("print \"hello\"[1:3][0:1];", "e\n");
    }

    #[test]
    fn test_soft_semicolons_run() {
        assert_prints("print 1;;;; print 2;", "1\n2\n");
    }

    #[test]
    fn test_shebang_and_comments_run() {
        assert_prints("#!/usr/bin/env uscript\nprint 1;", "1\n");
        assert_prints("print /* inline */ 2; // trailing\n", "2\n");
    }

    #[test]
    fn test_function_values_print() {
        assert_prints("fun f() {} print f;", "<fn f>\n");
        assert_prints("print clock;", "<native clock>\n");
    }

    #[test]
    fn test_arrays_of_arrays() {
        assert_prints("print [[1], [2, 3]];", "[[1], [2, 3]]\n");
        assert_prints("var a = [[1], [2, 3]]; print a[1][0];", "2\n");
    }

    #[test]
    fn test_while_with_logic_condition() {
        assert_prints(
            "var i = 0; while (i < 5 and i != 3) { i = i + 1; } print i;",
            "3\n",
        );
    }

    #[test]
    fn test_negated_complex() {
        assert_prints("print -I;", "-1j\n");
    }

    #[test]
    fn test_interpret_chunk() {
        use crate::chunk::{Chunk, OpCode};
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Int(2), 1, 0);
        chunk.write_constant(Value::Int(3), 1, 2);
        chunk.write_op(OpCode::Mul, 1, 4);
        chunk.write_op(OpCode::Print, 1, 5);
        chunk.write_op(OpCode::Nil, 1, 6);
        chunk.write_op(OpCode::Return, 1, 7);

        let config = Config::default();
        let buf = SharedBuf(Rc::new(RefCell::new(Vec::new())));
        let mut vm = Vm::with_output(&config, Box::new(buf.clone()));
        let result = vm.interpret_chunk(chunk);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "6\n");
    }

    #[test]
    fn test_compile_error_reaches_host() {
        let (result, text) = run("1 = 2;");
        assert_eq!(result, InterpretResult::CompileError);
        assert_eq!(text, "");
    }

    #[test]
    fn test_deep_but_bounded_recursion() {
        assert_prints(
            "fun down(n) { if (n == 0) return 0; return down(n - 1); } print down(200);",
            "0\n",
        );
    }
}
