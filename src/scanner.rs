// Hand-written scanner. Tokens borrow their lexeme straight out of the
// source buffer and carry both the end position (line/column) and the
// position where the token started.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Single-character tokens
    Colon,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Size,
    BitAnd,
    BitOr,
    BitXor,
    BitNeg,
    Bang,
    Equal,
    Greater,
    Slash,
    Remainder,
    Star,
    StarStar,
    Less,
    // Two or more characters
    BangEqual,
    EqualEqual,
    GreaterEqual,
    LessEqual,
    LeftShift,
    RightShift,
    // Compound assignment
    PlusEqual,
    MinusEqual,
    StarEqual,
    StarStarEqual,
    SlashEqual,
    RemainderEqual,
    BitAndEqual,
    BitOrEqual,
    BitXorEqual,
    LeftShiftEqual,
    RightShiftEqual,
    // Literals
    Identifier,
    String,
    Number,
    Integer,
    HexInt,
    // Keyword literals
    False,
    Inf,
    Nan,
    Nil,
    True,
    // Keywords
    And,
    Class,
    Else,
    For,
    Fun,
    If,
    Or,
    Print,
    Return,
    Super,
    This,
    Var,
    While,
    // Special
    Error,
    Eof,
}

pub fn is_number_token(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Number | TokenKind::Integer | TokenKind::HexInt
    )
}

pub fn is_keyword_token(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        And | Class
            | Else
            | False
            | For
            | Fun
            | If
            | Nil
            | Or
            | Print
            | Return
            | Super
            | This
            | True
            | Var
            | While
            | Error
    )
}

#[derive(Copy, Clone, Debug)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
    pub column: u32,
    pub start_line: u32,
    pub start_column: u32,
}

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: u32,
    column: u32,
    start_line: u32,
    start_column: u32,
}

fn is_digit(c: u8, hex: bool) -> bool {
    if hex && (c.is_ascii_lowercase() && c <= b'f' || c.is_ascii_uppercase() && c <= b'F') {
        return true;
    }
    c.is_ascii_digit()
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
            column: 0,
            start_line: 1,
            start_column: 0,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_next(&self) -> u8 {
        self.peek_at(1)
    }

    fn peek_at(&self, n: usize) -> u8 {
        *self.source.as_bytes().get(self.current + n).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        if self.is_at_end() {
            return 0;
        }
        let c = self.source.as_bytes()[self.current];
        self.current += 1;
        self.column += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 0;
        }
        c
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.advance();
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: &self.source[self.start..self.current],
            line: self.line,
            column: self.column,
            start_line: self.start_line,
            start_column: self.start_column,
        }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            line: self.line,
            column: self.column,
            start_line: self.start_line,
            start_column: self.start_column,
        }
    }

    // Whitespace, comments, and (at the very start of the file) a shebang
    // line. When semicolons_are_whitespace is set, `;` is swallowed too;
    // a `;;;` run after a statement turns it on for the stretch that
    // follows.
    fn skip_whitespace(&mut self, semicolons_are_whitespace: bool) {
        loop {
            match self.peek() {
                b'\n' | b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                b';' if semicolons_are_whitespace => {
                    self.advance();
                }
                b'#' => {
                    if self.peek_next() == b'!' && self.current == 0 {
                        while !(self.peek() == b'\n' || self.is_at_end()) {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                b'/' => {
                    if self.peek_next() == b'*' {
                        // Block comments do not nest
                        while !((self.peek() == b'*' && self.peek_next() == b'/')
                            || self.is_at_end())
                        {
                            self.advance();
                        }
                        if !self.is_at_end() {
                            self.advance();
                            self.advance();
                        }
                    } else if self.peek_next() == b'/' {
                        while !(self.peek() == b'\n' || self.is_at_end()) {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn check_keyword(
        &self,
        offset: usize,
        rest: &str,
        kind: TokenKind,
    ) -> TokenKind {
        let lexeme = &self.source[self.start..self.current];
        if lexeme.len() == offset + rest.len() && &lexeme[offset..] == rest {
            kind
        } else {
            TokenKind::Identifier
        }
    }

    fn identifier_kind(&self) -> TokenKind {
        use TokenKind::*;
        let lexeme = self.source[self.start..self.current].as_bytes();
        match lexeme[0] {
            b'a' => self.check_keyword(1, "nd", And),
            b'c' => self.check_keyword(1, "lass", Class),
            b'e' => self.check_keyword(1, "lse", Else),
            b'o' => self.check_keyword(1, "r", Or),
            b'p' => self.check_keyword(1, "rint", Print),
            b'r' => self.check_keyword(1, "eturn", Return),
            b's' => self.check_keyword(1, "uper", Super),
            b'v' => self.check_keyword(1, "ar", Var),
            b'w' => self.check_keyword(1, "hile", While),
            // Infinity, inf, if
            b'I' => self.check_keyword(1, "nfinity", Inf),
            b'i' if lexeme.len() > 1 => match lexeme[1] {
                b'f' if lexeme.len() == 2 => If,
                b'n' => self.check_keyword(2, "f", Inf),
                _ => Identifier,
            },
            // nil, nan, NaN
            b'N' => self.check_keyword(1, "aN", Nan),
            b'n' if lexeme.len() > 1 => match lexeme[1] {
                b'i' => self.check_keyword(2, "l", Nil),
                b'a' => self.check_keyword(2, "n", Nan),
                _ => Identifier,
            },
            // false, for, fun
            b'f' if lexeme.len() > 1 => match lexeme[1] {
                b'a' => self.check_keyword(2, "lse", False),
                b'o' => self.check_keyword(2, "r", For),
                b'u' => self.check_keyword(2, "n", Fun),
                _ => Identifier,
            },
            // this, true
            b't' if lexeme.len() > 1 => match lexeme[1] {
                b'h' => self.check_keyword(2, "is", This),
                b'r' => self.check_keyword(2, "ue", True),
                _ => Identifier,
            },
            _ => TokenKind::Identifier,
        }
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek(), false) {
            self.advance();
        }
        self.make_token(self.identifier_kind())
    }

    fn hexnum(&mut self) -> Token<'src> {
        // The leading 0 is consumed, eat the x
        self.advance();
        while is_digit(self.peek(), true) {
            self.advance();
        }
        self.make_token(TokenKind::HexInt)
    }

    // integer = [0-9]+
    // float   = [0-9]+ ('.' [0-9]+)? ([eE] [+-]? [0-9]+)?
    fn number(&mut self, starts_with_dot: bool) -> Token<'src> {
        let mut is_float = starts_with_dot;
        while is_digit(self.peek(), false) {
            self.advance();
        }
        if !starts_with_dot && self.peek() == b'.' && is_digit(self.peek_next(), false) {
            is_float = true;
            self.advance();
            while is_digit(self.peek(), false) {
                self.advance();
            }
        }
        if self.peek() == b'e' || self.peek() == b'E' {
            let next = self.peek_next();
            let signed_digit =
                (next == b'+' || next == b'-') && is_digit(self.peek_at(2), false);
            if is_digit(next, false) || signed_digit {
                is_float = true;
                self.advance();
                if self.peek() == b'+' || self.peek() == b'-' {
                    self.advance();
                }
                while is_digit(self.peek(), false) {
                    self.advance();
                }
            }
        }
        self.make_token(if is_float {
            TokenKind::Number
        } else {
            TokenKind::Integer
        })
    }

    // Both quote styles scan the same way. A backslash shields the next
    // byte from terminating the literal but is otherwise left in place; the
    // compiler copies string contents verbatim.
    fn string(&mut self, quote: u8) -> Token<'src> {
        while self.peek() != quote && !self.is_at_end() {
            if self.peek() == b'\\' {
                self.advance();
            }
            self.advance();
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        self.advance();
        self.make_token(TokenKind::String)
    }

    pub fn scan_token(&mut self) -> Token<'src> {
        use TokenKind::*;
        self.skip_whitespace(false);
        self.start_line = self.line;
        self.start_column = self.column;
        self.start = self.current;
        if self.is_at_end() {
            return self.make_token(Eof);
        }
        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if c == b'0' && (self.peek() == b'x' || self.peek() == b'X') {
            return self.hexnum();
        }
        if (c == b'.' && is_digit(self.peek(), false)) || is_digit(c, false) {
            return self.number(c == b'.');
        }
        match c {
            b':' => self.make_token(Colon),
            b'(' => self.make_token(LeftParen),
            b')' => self.make_token(RightParen),
            b'{' => self.make_token(LeftBrace),
            b'}' => self.make_token(RightBrace),
            b'[' => self.make_token(LeftBracket),
            b']' => self.make_token(RightBracket),
            b',' => self.make_token(Comma),
            b'.' => self.make_token(Dot),
            b';' => {
                // A triple semicolon makes the semicolons that follow soft.
                let token = self.make_token(Semicolon);
                self.skip_whitespace(false);
                if self.peek() == b';' && self.peek_next() == b';' && self.peek_at(2) == b';' {
                    self.skip_whitespace(true);
                }
                token
            }
            b'#' => self.make_token(Size),
            b'~' => self.make_token(BitNeg),
            b'-' => {
                let kind = if self.match_byte(b'=') { MinusEqual } else { Minus };
                self.make_token(kind)
            }
            b'+' => {
                let kind = if self.match_byte(b'=') { PlusEqual } else { Plus };
                self.make_token(kind)
            }
            b'&' => {
                let kind = if self.match_byte(b'=') { BitAndEqual } else { BitAnd };
                self.make_token(kind)
            }
            b'|' => {
                let kind = if self.match_byte(b'=') { BitOrEqual } else { BitOr };
                self.make_token(kind)
            }
            b'^' => {
                let kind = if self.match_byte(b'=') { BitXorEqual } else { BitXor };
                self.make_token(kind)
            }
            b'/' => {
                let kind = if self.match_byte(b'=') { SlashEqual } else { Slash };
                self.make_token(kind)
            }
            b'%' => {
                let kind = if self.match_byte(b'=') {
                    RemainderEqual
                } else {
                    Remainder
                };
                self.make_token(kind)
            }
            b'!' => {
                let kind = if self.match_byte(b'=') { BangEqual } else { Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_byte(b'=') { EqualEqual } else { Equal };
                self.make_token(kind)
            }
            b'*' => {
                let kind = if self.match_byte(b'*') {
                    if self.match_byte(b'=') {
                        StarStarEqual
                    } else {
                        StarStar
                    }
                } else if self.match_byte(b'=') {
                    StarEqual
                } else {
                    Star
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.match_byte(b'=') {
                    GreaterEqual
                } else if self.match_byte(b'>') {
                    if self.match_byte(b'=') {
                        RightShiftEqual
                    } else {
                        RightShift
                    }
                } else {
                    Greater
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_byte(b'=') {
                    LessEqual
                } else if self.match_byte(b'<') {
                    if self.match_byte(b'=') {
                        LeftShiftEqual
                    } else {
                        LeftShift
                    }
                } else {
                    Less
                };
                self.make_token(kind)
            }
            b'"' => self.string(b'"'),
            b'\'' => self.string(b'\''),
            _ => {
                // Consume any UTF-8 continuation bytes so the lexeme slice
                // stays on a character boundary.
                while self.peek() & 0xC0 == 0x80 {
                    self.current += 1;
                    self.column += 1;
                }
                self.error_token("Unexpected character")
            }
        }
    }
}

// Token dump behind the --lex flag.
pub fn scan_and_print(source: &str) {
    let mut scanner = Scanner::new(source);
    loop {
        let token = scanner.scan_token();
        print!("{:4}:{:<4} ", token.line, token.column);
        if token.kind == TokenKind::Eof {
            println!("EOF");
            break;
        } else if is_keyword_token(token.kind) || is_number_token(token.kind) {
            println!("{}", token.lexeme);
        } else {
            println!("'{}'", token.lexeme);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                return out;
            }
        }
    }

    fn single(source: &str) -> Token {
        let mut scanner = Scanner::new(source);
        scanner.scan_token()
    }

    #[test]
    fn test_punctuation_and_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("( ) { } [ ] , . ; : # ~"),
            vec![
                LeftParen,
                RightParen,
                LeftBrace,
                RightBrace,
                LeftBracket,
                RightBracket,
                Comma,
                Dot,
                Semicolon,
                Colon,
                Size,
                BitNeg,
                Eof
            ]
        );
    }

    #[test]
    fn test_longest_match() {
        use TokenKind::*;
        assert_eq!(
            kinds("* ** *= **= > >= >> >>= < <= << <<= ! != = =="),
            vec![
                Star,
                StarStar,
                StarEqual,
                StarStarEqual,
                Greater,
                GreaterEqual,
                RightShift,
                RightShiftEqual,
                Less,
                LessEqual,
                LeftShift,
                LeftShiftEqual,
                Bang,
                BangEqual,
                Equal,
                EqualEqual,
                Eof
            ]
        );
        assert_eq!(
            kinds("+= -= /= %= &= |= ^="),
            vec![
                PlusEqual,
                MinusEqual,
                SlashEqual,
                RemainderEqual,
                BitAndEqual,
                BitOrEqual,
                BitXorEqual,
                Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        use TokenKind::*;
        assert_eq!(single("42").kind, Integer);
        assert_eq!(single("42.5").kind, Number);
        assert_eq!(single(".5").kind, Number);
        assert_eq!(single("1e10").kind, Number);
        assert_eq!(single("1e+10").kind, Number);
        assert_eq!(single("1.5e-3").kind, Number);
        assert_eq!(single("0xff").kind, HexInt);
        assert_eq!(single("0XAB").kind, HexInt);
        // `1e+` is an integer followed by junk, not a float
        assert_eq!(kinds("1e+"), vec![Integer, Plus, Eof]);
        // and a trailing dot stays a separate token
        assert_eq!(kinds("123."), vec![Integer, Dot, Eof]);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(single("var").kind, Var);
        assert_eq!(single("variable").kind, Identifier);
        assert_eq!(single("fun").kind, Fun);
        assert_eq!(single("funk").kind, Identifier);
        assert_eq!(single("if").kind, If);
        assert_eq!(single("inf").kind, Inf);
        assert_eq!(single("Infinity").kind, Inf);
        assert_eq!(single("nan").kind, Nan);
        assert_eq!(single("NaN").kind, Nan);
        assert_eq!(single("nil").kind, Nil);
        assert_eq!(single("_under").kind, Identifier);
    }

    #[test]
    fn test_strings() {
        let token = single("\"hello\"");
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.lexeme, "\"hello\"");
        let token = single("'single'");
        assert_eq!(token.kind, TokenKind::String);
        // escaped quote does not end the literal and stays in the lexeme
        let token = single(r#""a\"b""#);
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.lexeme, r#""a\"b""#);
        let token = single("\"open");
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unterminated string.");
    }

    #[test]
    fn test_comments_and_shebang() {
        use TokenKind::*;
        assert_eq!(kinds("1 // comment\n2"), vec![Integer, Integer, Eof]);
        assert_eq!(kinds("1 /* mid */ 2"), vec![Integer, Integer, Eof]);
        assert_eq!(kinds("#!/usr/bin/env uscript\n1"), vec![Integer, Eof]);
        // '#' later in the file is the size operator
        assert_eq!(kinds("#x"), vec![Size, Identifier, Eof]);
    }

    #[test]
    fn test_soft_semicolons() {
        use TokenKind::*;
        // After `;;;` the following semicolons melt into whitespace
        assert_eq!(kinds("1;;;; 2;"), vec![Integer, Semicolon, Integer, Semicolon, Eof]);
    }

    #[test]
    fn test_positions() {
        let mut scanner = Scanner::new("var x\n  = 1;");
        let var = scanner.scan_token();
        assert_eq!((var.line, var.start_column), (1, 0));
        let x = scanner.scan_token();
        assert_eq!((x.line, x.start_column), (1, 4));
        let eq = scanner.scan_token();
        assert_eq!(eq.line, 2);
    }

    #[test]
    fn test_unexpected_character() {
        let token = single("@");
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unexpected character");
    }

    #[test]
    fn test_unterminated_block_comment_hits_eof() {
        use TokenKind::*;
        assert_eq!(kinds("1 /* never closed"), vec![Integer, Eof]);
    }

    #[test]
    fn test_error_lexeme_spans_whole_character() {
        // Multi-byte garbage still produces a well-formed error token
        let mut scanner = Scanner::new("é x");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Identifier);
        assert_eq!(token.lexeme, "x");
    }

    #[test]
    fn test_line_counting_across_comments() {
        let mut scanner = Scanner::new("// one\n/* two\nthree */ x");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Identifier);
        assert_eq!(token.line, 3);
    }
}
