use crate::language::token::{Token, TokenKind};

/// Scans a source buffer into a token stream. The stream always ends with an
/// end-of-file token; unrecognized input becomes `TokenKind::Error` tokens and
/// the caller decides whether to halt.
pub fn lex(source: &str) -> Vec<Token> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a [u8],
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            let c = self.advance();
            match c {
                b' ' | b'\t' | b'\r' => {}
                b'\n' => self.newline(),
                b'#' => self.eat_line_comment(),
                b'/' => {
                    if self.matches(b'/') {
                        self.eat_line_comment();
                    } else if self.matches(b'*') {
                        self.eat_block_comment();
                    } else if self.matches(b'=') {
                        self.push(TokenKind::SlashEq);
                    } else {
                        self.push(TokenKind::Slash);
                    }
                }
                b'"' | b'\'' => self.lex_string(c),
                b'0'..=b'9' => self.lex_number(),
                b'+' => {
                    if self.matches(b'+') {
                        self.push(TokenKind::PlusPlus);
                    } else if self.matches(b'=') {
                        self.push(TokenKind::PlusEq);
                    } else {
                        self.push(TokenKind::Plus);
                    }
                }
                b'-' => {
                    if self.matches(b'-') {
                        self.push(TokenKind::MinusMinus);
                    } else if self.matches(b'=') {
                        self.push(TokenKind::MinusEq);
                    } else if self.matches(b'>') {
                        self.push(TokenKind::Arrow);
                    } else {
                        self.push(TokenKind::Minus);
                    }
                }
                b'*' => {
                    if self.matches(b'=') {
                        self.push(TokenKind::StarEq);
                    } else {
                        self.push(TokenKind::Star);
                    }
                }
                b'%' => {
                    if self.matches(b'=') {
                        self.push(TokenKind::PercentEq);
                    } else {
                        self.push(TokenKind::Percent);
                    }
                }
                b'=' => {
                    if self.matches(b'=') {
                        self.push(TokenKind::EqEq);
                    } else {
                        self.push(TokenKind::Eq);
                    }
                }
                b'!' => {
                    if self.matches(b'=') {
                        self.push(TokenKind::BangEq);
                    } else {
                        self.push(TokenKind::Bang);
                    }
                }
                b'<' => {
                    if self.matches(b'<') {
                        if self.matches(b'=') {
                            self.push(TokenKind::ShlEq);
                        } else {
                            self.push(TokenKind::Shl);
                        }
                    } else if self.matches(b'=') {
                        self.push(TokenKind::LtEq);
                    } else {
                        self.push(TokenKind::Lt);
                    }
                }
                b'>' => {
                    if self.matches(b'>') {
                        if self.matches(b'=') {
                            self.push(TokenKind::ShrEq);
                        } else {
                            self.push(TokenKind::Shr);
                        }
                    } else if self.matches(b'=') {
                        self.push(TokenKind::GtEq);
                    } else {
                        self.push(TokenKind::Gt);
                    }
                }
                b'&' => {
                    if self.matches(b'&') {
                        self.push(TokenKind::AmpersandAmpersand);
                    } else if self.matches(b'=') {
                        self.push(TokenKind::AmpEq);
                    } else {
                        self.push(TokenKind::Ampersand);
                    }
                }
                b'|' => {
                    if self.matches(b'|') {
                        self.push(TokenKind::PipePipe);
                    } else if self.matches(b'=') {
                        self.push(TokenKind::PipeEq);
                    } else {
                        self.push(TokenKind::Pipe);
                    }
                }
                b'^' => {
                    if self.matches(b'=') {
                        self.push(TokenKind::CaretEq);
                    } else {
                        self.push(TokenKind::Caret);
                    }
                }
                b'~' => self.push(TokenKind::Tilde),
                b'(' => self.push(TokenKind::LParen),
                b')' => self.push(TokenKind::RParen),
                b'{' => self.push(TokenKind::LBrace),
                b'}' => self.push(TokenKind::RBrace),
                b'[' => self.push(TokenKind::LBracket),
                b']' => self.push(TokenKind::RBracket),
                b',' => self.push(TokenKind::Comma),
                b':' => self.push(TokenKind::Colon),
                b';' => self.push(TokenKind::Semi),
                b'?' => self.push(TokenKind::Question),
                b'.' => {
                    if self.matches(b'.') {
                        if self.matches(b'.') {
                            self.push(TokenKind::Ellipsis);
                        } else {
                            // `..` is not a valid token
                            self.push(TokenKind::Error);
                        }
                    } else {
                        self.push(TokenKind::Dot);
                    }
                }
                c if c.is_ascii_alphabetic() || c == b'_' => self.lex_identifier(),
                _ => self.push(TokenKind::Error),
            }
        }
        self.start = self.current;
        self.start_line = self.line;
        self.start_column = self.column;
        self.push(TokenKind::Eof);
        self.tokens
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.src.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.src[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.src.len() {
            0
        } else {
            self.src[self.current + 1]
        }
    }

    fn advance(&mut self) -> u8 {
        let c = self.src[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.src[self.current] != expected {
            return false;
        }
        self.current += 1;
        self.column += 1;
        true
    }

    fn newline(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    fn push(&mut self, kind: TokenKind) {
        let lexeme = String::from_utf8_lossy(&self.src[self.start..self.current]).into_owned();
        self.tokens
            .push(Token::new(kind, lexeme, self.start_line, self.start_column));
    }

    fn push_with_lexeme(&mut self, kind: TokenKind, lexeme: String) {
        self.tokens
            .push(Token::new(kind, lexeme, self.start_line, self.start_column));
    }

    fn eat_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != b'\n' {
            self.advance();
        }
    }

    fn eat_block_comment(&mut self) {
        while !self.is_at_end() {
            if self.peek() == b'*' && self.peek_next() == b'/' {
                self.advance();
                self.advance();
                return;
            }
            if self.peek() == b'\n' {
                self.advance();
                self.newline();
            } else {
                self.advance();
            }
        }
        self.push(TokenKind::Error);
    }

    fn lex_identifier(&mut self) {
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == b'_') {
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[self.start..self.current]).unwrap_or("");
        let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Identifier);
        self.push(kind);
    }

    fn lex_number(&mut self) {
        let first = self.src[self.start];
        if first == b'0' && matches!(self.peek(), b'x' | b'X' | b'b' | b'B' | b'o' | b'O') {
            let base = self.advance();
            let digits_start = self.current;
            let valid = |c: u8| match base {
                b'x' | b'X' => c.is_ascii_hexdigit(),
                b'b' | b'B' => c == b'0' || c == b'1',
                _ => (b'0'..=b'7').contains(&c),
            };
            while !self.is_at_end() && valid(self.peek()) {
                self.advance();
            }
            if self.current == digits_start {
                self.push(TokenKind::Error);
            } else {
                self.push(TokenKind::Number);
            }
            return;
        }

        while !self.is_at_end() && self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        if matches!(self.peek(), b'e' | b'E') {
            self.advance();
            if matches!(self.peek(), b'+' | b'-') {
                self.advance();
            }
            if !self.peek().is_ascii_digit() {
                self.push(TokenKind::Error);
                return;
            }
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        self.push(TokenKind::Number);
    }

    fn lex_string(&mut self, quote: u8) {
        let mut value = String::new();
        while !self.is_at_end() {
            let c = self.advance();
            if c == quote {
                self.push_with_lexeme(TokenKind::Str, value);
                return;
            }
            match c {
                b'\\' => {
                    if self.is_at_end() {
                        break;
                    }
                    let escaped = self.advance();
                    value.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        b'\\' => '\\',
                        b'"' => '"',
                        b'\'' => '\'',
                        other => other as char,
                    });
                    if escaped == b'\n' {
                        self.newline();
                    }
                }
                b'\n' => {
                    value.push('\n');
                    self.newline();
                }
                _ => value.push(c as char),
            }
        }
        // Unterminated string
        self.push(TokenKind::Error);
    }
}
