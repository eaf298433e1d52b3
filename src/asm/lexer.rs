//! Assembler lexer.
//!
//! Tokenizes assembly source into mnemonics, registers, immediates, labels,
//! directives, strings and punctuation. Whitespace is skipped; `;` starts a
//! comment running to end of line. Line and column are tracked on every
//! token for diagnostics.

use crate::core::Word;

/// Token classes produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// ADD, SUB, MOV, ... (case-insensitive).
    Mnemonic,
    /// R0..R31 and the SP/LR/PC aliases.
    Register,
    /// `#`-prefixed literal: decimal, 0x hex or 0b binary, optionally
    /// signed.
    Immediate,
    /// Identifier immediately followed by `:` (colon consumed).
    Label,
    /// Any other identifier: a reference to a label.
    LabelRef,
    /// `.` followed by an identifier.
    Directive,
    /// Double-quoted string; escape decoding happens in the parser.
    String,
    Comma,
    /// A `:` not attached to an identifier (label colons are consumed by
    /// the label token).
    Colon,
    LeftBracket,
    RightBracket,
    NewLine,
    EndOfFile,
    Unknown,
}

/// One lexical token with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Parsed numeric value for immediates (two's-complement bit pattern
    /// for negative literals).
    pub value: Option<Word>,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn simple(kind: TokenKind, text: &str, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: text.to_string(),
            value: None,
            line,
            column,
        }
    }
}

pub struct Lexer<'a> {
    source: &'a [u8],
    current: usize,
    line: usize,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            current: 0,
            line: 1,
            line_start: 0,
        }
    }

    /// Tokenize the whole input. The stream always ends with an explicit
    /// end-of-file token so the parser never has to bounds-check.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            tokens.push(self.scan_token());
        }
        tokens.push(Token::simple(
            TokenKind::EndOfFile,
            "",
            self.line,
            self.current - self.line_start,
        ));
        tokens
    }

    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.source
            .get(self.current + offset)
            .copied()
            .unwrap_or(0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        if c != 0 {
            self.current += 1;
        }
        c
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn column_of(&self, start: usize) -> usize {
        start - self.line_start + 1
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b';' => {
                    while !self.is_at_end() && self.peek() != b'\n' {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_token(&mut self) -> Token {
        let start = self.current;
        let column = self.column_of(start);
        let c = self.advance();

        match c {
            b'"' => self.scan_string(start, column),
            b'\n' => {
                let line = self.line;
                self.line += 1;
                self.line_start = self.current;
                Token::simple(TokenKind::NewLine, "\\n", line, column)
            }
            b',' => Token::simple(TokenKind::Comma, ",", self.line, column),
            b':' => Token::simple(TokenKind::Colon, ":", self.line, column),
            b'[' => Token::simple(TokenKind::LeftBracket, "[", self.line, column),
            b']' => Token::simple(TokenKind::RightBracket, "]", self.line, column),
            b'.' => {
                if self.peek().is_ascii_alphabetic() {
                    while self.peek().is_ascii_alphanumeric() {
                        self.advance();
                    }
                    let text = self.text_from(start);
                    Token::simple(TokenKind::Directive, &text, self.line, column)
                } else {
                    Token::simple(TokenKind::Unknown, ".", self.line, column)
                }
            }
            b'#' => self.scan_number(column),
            c if c.is_ascii_alphabetic() || c == b'_' => {
                // Back up one so the identifier scan sees its first byte.
                self.current -= 1;
                self.scan_identifier(column)
            }
            c => Token::simple(
                TokenKind::Unknown,
                &(c as char).to_string(),
                self.line,
                column,
            ),
        }
    }

    fn scan_number(&mut self, column: usize) -> Token {
        let start = self.current; // Past the '#'.

        let mut negative = false;
        match self.peek() {
            b'-' => {
                negative = true;
                self.advance();
            }
            b'+' => {
                self.advance();
            }
            _ => {}
        }

        let mut radix = 10;
        if self.peek() == b'0' {
            match self.peek_at(1).to_ascii_lowercase() {
                b'x' => {
                    radix = 16;
                    self.advance();
                    self.advance();
                }
                b'b' => {
                    radix = 2;
                    self.advance();
                    self.advance();
                }
                _ => {}
            }
        }

        let digits_start = self.current;
        while self.peek().is_ascii_hexdigit() {
            self.advance();
        }

        let digits = self.text_from(digits_start);
        let text = format!("#{}", self.text_from(start));

        let Ok(magnitude) = i64::from_str_radix(&digits, radix) else {
            return Token {
                kind: TokenKind::Unknown,
                text,
                value: None,
                line: self.line,
                column,
            };
        };
        let value = if negative { -magnitude } else { magnitude };

        Token {
            kind: TokenKind::Immediate,
            text,
            value: Some(value as Word),
            line: self.line,
            column,
        }
    }

    fn scan_string(&mut self, start: usize, column: usize) -> Token {
        // Content between the quotes; backslash escapes are decoded later by
        // the parser, but an escaped quote must not terminate the scan.
        loop {
            match self.peek() {
                0 => {
                    return Token::simple(
                        TokenKind::Unknown,
                        "unterminated string",
                        self.line,
                        column,
                    );
                }
                b'"' => break,
                b'\\' if self.peek_at(1) != 0 => {
                    self.advance();
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                _ => {
                    self.advance();
                }
            }
        }
        self.advance(); // Closing quote.

        let text = self.text_from(start + 1);
        let text = text[..text.len() - 1].to_string();
        Token {
            kind: TokenKind::String,
            text,
            value: None,
            line: self.line,
            column,
        }
    }

    fn scan_identifier(&mut self, column: usize) -> Token {
        let start = self.current;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let text = self.text_from(start);

        // Identifier immediately followed by ':' defines a label; the colon
        // is consumed and stripped.
        if self.peek() == b':' {
            self.advance();
            return Token::simple(TokenKind::Label, &text, self.line, column);
        }

        let kind = classify_identifier(&text);
        Token::simple(kind, &text, self.line, column)
    }

    fn text_from(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.source[start..self.current]).into_owned()
    }
}

fn classify_identifier(text: &str) -> TokenKind {
    let upper = text.to_ascii_uppercase();
    match upper.as_str() {
        "NOP" | "ADD" | "SUB" | "AND" | "OR" | "XOR" | "LSL" | "LSR" | "ASR" | "CMP"
        | "LDR" | "STR" | "MOV" | "B" | "BEQ" | "BNE" | "HALT" => TokenKind::Mnemonic,
        "SP" | "LR" | "PC" => TokenKind::Register,
        _ => {
            if let Some(digits) = upper.strip_prefix('R') {
                if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(index) = digits.parse::<u32>() {
                        if index < 32 {
                            return TokenKind::Register;
                        }
                    }
                }
            }
            TokenKind::LabelRef
        }
    }
}
