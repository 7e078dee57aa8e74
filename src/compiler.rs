// Single-pass compiler: a Pratt parser that emits bytecode as it goes, with
// no intermediate tree. Local variables live on the VM's value stack, so the
// compiler only tracks their names and scope depth; globals are left to a
// runtime name lookup. Forward jumps are emitted with a placeholder operand
// and patched once the target is known.

use crate::chunk::{Chunk, OpCode, SIZE_OF_24BIT_ARGS};
use crate::debug;
use crate::object::{Function, Interner};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;
use std::rc::Rc;
use tracing::trace;

const MAX_LOCALS: usize = 1024;
const MAX_JUMP: usize = 1 << 24;

#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    BitOr,      // |
    BitXor,     // ^
    BitAnd,     // &
    Equality,   // == !=
    Comparison, // > < >= <=
    Shift,      // << >>
    Term,       // + -
    Factor,     // * / %
    Exponential, // **
    Unary,      // ! ~ - #
    Call,       // () []
    Primary,
}

impl Precedence {
    fn one_higher(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => BitOr,
            BitOr => BitXor,
            BitXor => BitAnd,
            BitAnd => Equality,
            Equality => Comparison,
            Comparison => Shift,
            Shift => Term,
            Term => Factor,
            Factor => Exponential,
            Exponential => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum FunctionKind {
    Function,
    TopLevel,
}

struct Local<'src> {
    name: Token<'src>,
    depth: i32,
}

struct Compiler<'src> {
    enclosing: Option<Box<Compiler<'src>>>,
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
}

impl<'src> Compiler<'src> {
    fn new(name: Rc<crate::object::Str>, kind: FunctionKind) -> Compiler<'src> {
        let reserved = Local {
            name: Token {
                kind: TokenKind::Identifier,
                lexeme: "",
                line: 0,
                column: 0,
                start_line: 0,
                start_column: 0,
            },
            depth: 0,
        };
        Compiler {
            enclosing: None,
            function: Function::new(name),
            kind,
            // Slot zero of every frame is claimed for the callee.
            locals: vec![reserved],
            scope_depth: 0,
        }
    }
}

type ParseFn<'src, 'i> = fn(&mut Parser<'src, 'i>, bool);

struct ParseRule<'src, 'i> {
    prefix: Option<ParseFn<'src, 'i>>,
    infix: Option<ParseFn<'src, 'i>>,
    precedence: Precedence,
}

const COMPOUND_ASSIGN: [TokenKind; 12] = [
    TokenKind::Equal,
    TokenKind::PlusEqual,
    TokenKind::MinusEqual,
    TokenKind::StarEqual,
    TokenKind::StarStarEqual,
    TokenKind::SlashEqual,
    TokenKind::RemainderEqual,
    TokenKind::BitAndEqual,
    TokenKind::BitOrEqual,
    TokenKind::BitXorEqual,
    TokenKind::LeftShiftEqual,
    TokenKind::RightShiftEqual,
];

fn compound_op(kind: TokenKind) -> OpCode {
    match kind {
        TokenKind::PlusEqual => OpCode::Add,
        TokenKind::MinusEqual => OpCode::Sub,
        TokenKind::StarEqual => OpCode::Mul,
        TokenKind::SlashEqual => OpCode::Div,
        TokenKind::StarStarEqual => OpCode::Exp,
        TokenKind::RemainderEqual => OpCode::Remainder,
        TokenKind::BitAndEqual => OpCode::BitAnd,
        TokenKind::BitOrEqual => OpCode::BitOr,
        TokenKind::BitXorEqual => OpCode::BitXor,
        TokenKind::LeftShiftEqual => OpCode::LeftShift,
        TokenKind::RightShiftEqual => OpCode::RightShift,
        _ => OpCode::Invalid,
    }
}

pub struct Parser<'src, 'i> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    compiler: Box<Compiler<'src>>,
    strings: &'i mut Interner,
    debug_trace: bool,
}

impl<'src, 'i> Parser<'src, 'i> {
    fn new(source: &'src str, strings: &'i mut Interner, debug_trace: bool) -> Parser<'src, 'i> {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
            column: 0,
            start_line: 1,
            start_column: 0,
        };
        let top_level = strings.intern("<top_level>");
        Parser {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            compiler: Box::new(Compiler::new(top_level, FunctionKind::TopLevel)),
            strings,
            debug_trace,
        }
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.compiler.function.chunk
    }

    // ---- diagnostics ------------------------------------------------

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        eprint!("[{}:{}] Error", token.line, token.column);
        match token.kind {
            TokenKind::Eof => eprint!(" at end of input"),
            TokenKind::Error => {}
            _ => eprint!(" at {}", token.lexeme),
        }
        eprintln!(": {}", message);
        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    // ---- token plumbing ---------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let token = self.current;
            self.error_at(token, token.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
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

    // ---- emission ---------------------------------------------------

    fn emit_op(&mut self, op: OpCode) {
        let (line, column) = (self.previous.line, self.previous.column);
        self.current_chunk().write_op(op, line, column);
    }

    fn emit_ops(&mut self, a: OpCode, b: OpCode) {
        self.emit_op(a);
        self.emit_op(b);
    }

    fn emit_byte(&mut self, byte: u8) {
        let (line, column) = (self.previous.line, self.previous.column);
        self.current_chunk().write_byte(byte, line, column);
    }

    fn emit_return(&mut self) {
        self.emit_ops(OpCode::Nil, OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> usize {
        self.current_chunk().add_constant(value)
    }

    fn emit_constant(&mut self, value: Value) {
        let (line, column) = (self.previous.line, self.previous.column);
        self.current_chunk().write_constant(value, line, column);
    }

    fn emit_by_offset(&mut self, short: OpCode, long: OpCode, index: usize) {
        let (line, column) = (self.previous.line, self.previous.column);
        self.current_chunk()
            .write_by_offset(short, long, index, line, column);
    }

    // Emit a forward jump with a placeholder operand; the returned offset
    // addresses the operand for patch_jump.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let (line, column) = (self.previous.line, self.previous.column);
        self.current_chunk().write_24bit(0xff_ffff, line, column);
        self.current_chunk().code.len() - SIZE_OF_24BIT_ARGS
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().code.len() - offset - SIZE_OF_24BIT_ARGS;
        if jump > MAX_JUMP {
            self.error("Too much jump!");
        }
        let code = &mut self.current_chunk().code;
        code[offset] = jump as u8;
        code[offset + 1] = (jump >> 8) as u8;
        code[offset + 2] = (jump >> 16) as u8;
    }

    // Backwards jump to an already-known target.
    fn emit_neg_jump(&mut self, target: usize) {
        self.emit_op(OpCode::NegJump);
        let offset = self.current_chunk().code.len() - target + SIZE_OF_24BIT_ARGS;
        if offset > MAX_JUMP {
            self.error("Too much jump!");
        }
        let (line, column) = (self.previous.line, self.previous.column);
        self.current_chunk().write_24bit(offset, line, column);
    }

    // ---- scopes and variables ---------------------------------------

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        while self
            .compiler
            .locals
            .last()
            .map_or(false, |local| local.depth > self.compiler.scope_depth)
        {
            self.emit_op(OpCode::Pop);
            self.compiler.locals.pop();
        }
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> usize {
        let interned = self.strings.intern(name.lexeme);
        self.make_constant(Value::Str(interned))
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.compiler.locals.len() == MAX_LOCALS {
            self.error("Too many local variables.");
            return;
        }
        // Uninitialized until the initializer has been compiled
        self.compiler.locals.push(Local { name, depth: -1 });
    }

    fn declare_variable(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let mut duplicate = false;
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }
            if local.name.lexeme == name.lexeme {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("A variable exists with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> usize {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }
        // A name lookup is only needed for globals
        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let depth = self.compiler.scope_depth;
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: usize) {
        if self.compiler.scope_depth == 0 {
            self.emit_by_offset(OpCode::DefineGlobal, OpCode::DefineGlobalLong, global);
        } else {
            // Locals need no runtime definition, the value is already in
            // its stack slot
            self.mark_initialized();
        }
    }

    fn resolve_local(&mut self, name: &Token<'src>) -> Option<usize> {
        let mut uninitialized = false;
        let mut found = None;
        for (i, local) in self.compiler.locals.iter().enumerate().rev() {
            if local.name.lexeme == name.lexeme && !local.name.lexeme.is_empty() {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = Some(i);
                break;
            }
        }
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    fn emit_variable_access(&mut self, get: bool, local: Option<usize>, name: Token<'src>) {
        match local {
            Some(slot) => {
                let (short, long) = if get {
                    (OpCode::GetLocal, OpCode::GetLocalLong)
                } else {
                    (OpCode::SetLocal, OpCode::SetLocalLong)
                };
                self.emit_by_offset(short, long, slot);
            }
            None => {
                let index = self.identifier_constant(name);
                let (short, long) = if get {
                    (OpCode::GetGlobal, OpCode::GetGlobalLong)
                } else {
                    (OpCode::SetGlobal, OpCode::SetGlobalLong)
                };
                self.emit_by_offset(short, long, index);
            }
        }
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let local = self.resolve_local(&name);
        let mut assign = None;
        if can_assign {
            for &kind in COMPOUND_ASSIGN.iter() {
                if self.match_token(kind) {
                    assign = Some(kind);
                    break;
                }
            }
        }
        match assign {
            Some(TokenKind::Equal) => {
                self.expression();
                self.emit_variable_access(false, local, name);
            }
            Some(op) => {
                // x op= e lowers to: load x, evaluate e, apply op, store x
                self.emit_variable_access(true, local, name);
                self.expression();
                self.emit_op(compound_op(op));
                self.emit_variable_access(false, local, name);
            }
            None => self.emit_variable_access(true, local, name),
        }
    }

    // ---- prefix and infix rules -------------------------------------

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Minus => self.emit_op(OpCode::Neg),
            // Unary plus is a no-op
            TokenKind::Plus => {}
            TokenKind::Size => self.emit_op(OpCode::Size),
            TokenKind::BitNeg => self.emit_op(OpCode::BitNeg),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        let precedence = Self::get_rule(op).precedence;
        self.parse_precedence(precedence.one_higher());
        match op {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Sub),
            TokenKind::Star => self.emit_op(OpCode::Mul),
            TokenKind::Slash => self.emit_op(OpCode::Div),
            TokenKind::StarStar => self.emit_op(OpCode::Exp),
            TokenKind::Remainder => self.emit_op(OpCode::Remainder),
            TokenKind::BitAnd => self.emit_op(OpCode::BitAnd),
            TokenKind::BitOr => self.emit_op(OpCode::BitOr),
            TokenKind::BitXor => self.emit_op(OpCode::BitXor),
            TokenKind::LeftShift => self.emit_op(OpCode::LeftShift),
            TokenKind::RightShift => self.emit_op(OpCode::RightShift),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            _ => {}
        }
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::Nan => self.emit_op(OpCode::Nan),
            TokenKind::Inf => self.emit_op(OpCode::Inf),
            _ => {}
        }
    }

    fn string(&mut self, _can_assign: bool) {
        // Strip the quotes; the bytes in between are taken verbatim
        let lexeme = self.previous.lexeme;
        let inner = &lexeme[1..lexeme.len() - 1];
        let interned = self.strings.intern(inner);
        self.emit_constant(Value::Str(interned));
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Double(value));
    }

    fn integer(&mut self, _can_assign: bool) {
        let value = self.previous.lexeme.parse::<i64>().unwrap_or(i64::MAX) as i32;
        self.emit_constant(Value::Int(value));
    }

    fn hexnumber(&mut self, _can_assign: bool) {
        let digits = &self.previous.lexeme[2..];
        let value = i64::from_str_radix(digits, 16).unwrap_or(0) as i32;
        self.emit_constant(Value::Int(value));
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn array(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::InitArray);
        while !(self.check(TokenKind::RightBracket) || self.check(TokenKind::Eof)) {
            self.expression();
            if !self.check(TokenKind::RightBracket) {
                self.consume(TokenKind::Comma, "Expect ',' after array element");
            } else {
                // Optional trailing comma
                self.match_token(TokenKind::Comma);
            }
            self.emit_op(OpCode::InsertArray);
        }
        self.consume(TokenKind::RightBracket, "Expect ']' at end of array.");
    }

    // Infix `[`: either a plain index or a slice. Slice bounds travel as a
    // small transient array so OP_SUBSCRIPT gets one key either way.
    fn subscript(&mut self, _can_assign: bool) {
        let mut is_slice = false;
        if self.match_token(TokenKind::Colon) {
            // [:e] is sugar for [0:e]
            self.emit_constant(Value::Int(0));
            is_slice = true;
        } else {
            self.expression();
        }
        if self.match_token(TokenKind::Colon) {
            is_slice = true;
        }
        if is_slice {
            // Wrap the first bound: push the array, swap it under the
            // bound, insert
            self.emit_op(OpCode::InitArray);
            self.emit_op(OpCode::Swap);
            self.emit_op(OpCode::InsertArray);
        }
        while !(self.check(TokenKind::RightBracket) || self.check(TokenKind::Eof)) {
            self.expression();
            self.emit_op(OpCode::InsertArray);
            if !self.check(TokenKind::RightBracket) {
                self.consume(TokenKind::Colon, "Expect ':' in array slice.");
            }
        }
        self.consume(
            TokenKind::RightBracket,
            "Expect ']' after array subscript or slice.",
        );
        self.emit_op(OpCode::Subscript);
    }

    fn hashmap(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::InitHashmap);
        while !(self.check(TokenKind::RightBrace) || self.check(TokenKind::Eof)) {
            self.expression();
            self.consume(TokenKind::Colon, "Expect ':' after hashmap key");
            self.expression();
            if !self.check(TokenKind::RightBrace) {
                self.consume(TokenKind::Comma, "Expect ',' after hashmap element");
            } else {
                self.match_token(TokenKind::Comma);
            }
            self.emit_op(OpCode::InsertHashmap);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' at end of hashmap.");
    }

    fn get_rule(kind: TokenKind) -> ParseRule<'src, 'i> {
        use TokenKind::*;
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'i>>,
            Option<ParseFn<'src, 'i>>,
            Precedence,
        ) = match kind {
            LeftParen => (Some(Self::grouping), Some(Self::call), Precedence::Call),
            LeftBrace => (Some(Self::hashmap), None, Precedence::None),
            LeftBracket => (
                Some(Self::array),
                Some(Self::subscript),
                Precedence::Call,
            ),
            Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            Plus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            Size | BitNeg | Bang => (Some(Self::unary), None, Precedence::None),
            Slash | Remainder | Star => (None, Some(Self::binary), Precedence::Factor),
            StarStar => (None, Some(Self::binary), Precedence::Exponential),
            BitAnd => (None, Some(Self::binary), Precedence::BitAnd),
            BitOr => (None, Some(Self::binary), Precedence::BitOr),
            BitXor => (None, Some(Self::binary), Precedence::BitXor),
            EqualEqual | BangEqual => (None, Some(Self::binary), Precedence::Equality),
            Greater | GreaterEqual | Less | LessEqual => {
                (None, Some(Self::binary), Precedence::Comparison)
            }
            LeftShift | RightShift => (None, Some(Self::binary), Precedence::Shift),
            Identifier => (Some(Self::variable), None, Precedence::None),
            String => (Some(Self::string), None, Precedence::None),
            Number => (Some(Self::number), None, Precedence::None),
            Integer => (Some(Self::integer), None, Precedence::None),
            HexInt => (Some(Self::hexnumber), None, Precedence::None),
            False | True | Nil | Nan | Inf => (Some(Self::literal), None, Precedence::None),
            And => (None, Some(Self::and_), Precedence::And),
            Or => (None, Some(Self::or_), Precedence::Or),
            _ => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = Self::get_rule(self.previous.kind).prefix;
        let prefix = match prefix {
            Some(rule) => rule,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        // The first token of an expression always carries a prefix rule
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // ---- nested functions -------------------------------------------

    fn begin_compiler(&mut self, kind: FunctionKind) {
        let name = self.strings.intern(self.previous.lexeme);
        let fresh = Box::new(Compiler::new(name, kind));
        let enclosing = std::mem::replace(&mut self.compiler, fresh);
        self.compiler.enclosing = Some(enclosing);
    }

    fn end_compiler(&mut self) -> Function {
        self.emit_return();
        let enclosing = self.compiler.enclosing.take().unwrap_or_else(|| {
            let name = self.strings.intern("<top_level>");
            Box::new(Compiler::new(name, FunctionKind::TopLevel))
        });
        let finished = std::mem::replace(&mut self.compiler, enclosing);
        let function = finished.function;
        if self.debug_trace {
            debug::disassemble_chunk(&function.chunk, &function.name.chars);
        }
        function
    }

    fn function(&mut self, kind: FunctionKind) {
        trace!(name = self.previous.lexeme, "compiling function");
        self.begin_compiler(kind);
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.compiler.function.arity += 1;
                if self.compiler.function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();
        let function = self.end_compiler();
        let index = self.make_constant(Value::Function(Rc::new(function)));
        self.emit_by_offset(OpCode::Constant, OpCode::ConstantLong, index);
    }

    // ---- declarations and statements --------------------------------

    fn block(&mut self) {
        while !(self.check(TokenKind::RightBrace) || self.check(TokenKind::Eof)) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after print.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.compiler.kind == FunctionKind::TopLevel {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return.");
            self.emit_op(OpCode::Return);
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_neg_jump(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }
        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }
        if !self.match_token(TokenKind::RightParen) {
            // The increment runs after the body, so jump over it now and
            // loop back to it from the body's end
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_neg_jump(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }
        self.statement();
        self.emit_neg_jump(loop_start);
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    // Skip to the next statement boundary so one mistake produces one
    // diagnostic.
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

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }
}

pub fn compile(source: &str, strings: &mut Interner, debug_trace: bool) -> Option<Function> {
    trace!(bytes = source.len(), "compile start");
    let mut parser = Parser::new(source, strings, debug_trace);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let function = parser.end_compiler();
    if parser.had_error {
        None
    } else {
        Some(function)
    }
}
