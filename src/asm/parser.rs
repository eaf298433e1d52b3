//! Assembler parser.
//!
//! Recursive descent over the token stream:
//!
//! ```text
//! program   := { statement }
//! statement := label | directive | instruction | NewLine
//! instruction := Mnemonic [operand { "," operand }] NewLine
//! operand   := Register | Immediate | LabelRef | memory
//! memory    := "[" Register [ "," Immediate ] "]"
//! ```
//!
//! Output is the AST: parsed instructions with source positions, label
//! definitions indexed by instruction, and the data segment accumulated by
//! `.string` directives.

use crate::core::Word;
use crate::cpu::Opcode;

use super::lexer::{Token, TokenKind};
use super::{AsmError, Stage};

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(u8),
    Immediate(Word),
    /// `[base, #offset]`. Pre-index and write-back are parsed but unused by
    /// the current ISA; they default to false and are kept for future
    /// addressing-mode extension.
    Memory {
        base: u8,
        offset: i64,
        pre_indexed: bool,
        write_back: bool,
    },
    Label(String),
}

/// One parsed instruction with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub op: Opcode,
    /// Original mnemonic text, kept for diagnostics.
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub line: usize,
    pub column: usize,
}

/// A label definition: name plus the index of the instruction it precedes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDef {
    pub name: String,
    pub instruction_index: usize,
}

/// Parser output: the pieces the resolver and encoder consume.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<ParsedInstruction>,
    pub labels: Vec<LabelDef>,
    pub data_segment: Vec<u8>,
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    program: Program,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            program: Program::default(),
        }
    }

    /// Parse the whole token stream. Fails fast: the first error stops the
    /// pipeline.
    pub fn parse(mut self) -> Result<Program, AsmError> {
        while !self.is_at_end() {
            self.parse_statement()?;
        }
        Ok(self.program)
    }

    fn parse_statement(&mut self) -> Result<(), AsmError> {
        if self.matches(TokenKind::NewLine) {
            return Ok(());
        }
        match self.peek().kind {
            TokenKind::Label => self.parse_label(),
            TokenKind::Directive => self.parse_directive(),
            TokenKind::Mnemonic => self.parse_instruction(),
            _ => {
                let token = self.peek().clone();
                Err(self.error(&token, format!("unexpected token '{}'", token.text)))
            }
        }
    }

    fn parse_label(&mut self) -> Result<(), AsmError> {
        let token = self.advance().clone();
        if self
            .program
            .labels
            .iter()
            .any(|label| label.name == token.text)
        {
            return Err(self.error(&token, format!("duplicate label '{}'", token.text)));
        }
        self.program.labels.push(LabelDef {
            name: token.text,
            instruction_index: self.program.instructions.len(),
        });
        Ok(())
    }

    fn parse_directive(&mut self) -> Result<(), AsmError> {
        let token = self.advance().clone();
        match token.text.to_ascii_lowercase().as_str() {
            ".string" => self.parse_string_directive()?,
            // Section markers are accepted as no-ops.
            ".data" | ".text" => {}
            _ => {
                return Err(
                    self.error(&token, format!("unknown directive '{}'", token.text))
                );
            }
        }
        if !self.is_at_end() {
            self.consume(TokenKind::NewLine, "expected newline after directive")?;
        }
        Ok(())
    }

    /// `.string "..."`: append the decoded bytes plus a terminating zero to
    /// the data segment.
    fn parse_string_directive(&mut self) -> Result<(), AsmError> {
        if !self.check(TokenKind::String) {
            let token = self.peek().clone();
            return Err(self.error(&token, "expected string literal".to_string()));
        }
        let raw = self.advance().text.clone();

        let bytes = raw.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b'\\' && i + 1 < bytes.len() {
                let escaped = match bytes[i + 1] {
                    b'n' => Some(b'\n'),
                    b't' => Some(b'\t'),
                    b'r' => Some(b'\r'),
                    b'0' => Some(0),
                    b'\\' => Some(b'\\'),
                    b'"' => Some(b'"'),
                    _ => None,
                };
                match escaped {
                    Some(byte) => {
                        self.program.data_segment.push(byte);
                        i += 2;
                    }
                    None => {
                        // Unknown escape: keep the backslash and the
                        // following byte verbatim.
                        self.program.data_segment.push(c);
                        self.program.data_segment.push(bytes[i + 1]);
                        i += 2;
                    }
                }
            } else {
                self.program.data_segment.push(c);
                i += 1;
            }
        }
        self.program.data_segment.push(0);
        Ok(())
    }

    fn parse_instruction(&mut self) -> Result<(), AsmError> {
        let token = self.advance().clone();
        let op = mnemonic_to_opcode(&token.text)
            .ok_or_else(|| self.error(&token, format!("unknown mnemonic '{}'", token.text)))?;

        let mut instr = ParsedInstruction {
            op,
            mnemonic: token.text,
            operands: Vec::new(),
            line: token.line,
            column: token.column,
        };

        if !self.check(TokenKind::NewLine) && !self.is_at_end() {
            loop {
                instr.operands.push(self.parse_operand()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        if !self.is_at_end() {
            self.consume(TokenKind::NewLine, "expected newline after instruction")?;
        }

        self.program.instructions.push(instr);
        Ok(())
    }

    fn parse_operand(&mut self) -> Result<Operand, AsmError> {
        match self.peek().kind {
            TokenKind::LeftBracket => self.parse_memory_operand(),
            TokenKind::Register => self.parse_register().map(Operand::Register),
            TokenKind::Immediate => self.parse_immediate().map(Operand::Immediate),
            TokenKind::LabelRef => {
                let token = self.advance().clone();
                Ok(Operand::Label(token.text))
            }
            _ => {
                let token = self.peek().clone();
                Err(self.error(
                    &token,
                    "expected operand (register, immediate, memory, or label)".to_string(),
                ))
            }
        }
    }

    /// `[Rn]` or `[Rn, #imm]`.
    fn parse_memory_operand(&mut self) -> Result<Operand, AsmError> {
        self.consume(TokenKind::LeftBracket, "expected '['")?;
        let base = self.parse_register()?;

        let mut offset = 0i64;
        if self.matches(TokenKind::Comma) {
            offset = self.parse_immediate()? as i64;
        }

        self.consume(TokenKind::RightBracket, "expected ']'")?;
        Ok(Operand::Memory {
            base,
            offset,
            pre_indexed: false,
            write_back: false,
        })
    }

    fn parse_register(&mut self) -> Result<u8, AsmError> {
        if !self.check(TokenKind::Register) {
            let token = self.peek().clone();
            return Err(self.error(&token, "expected register".to_string()));
        }
        let token = self.advance().clone();
        register_index(&token.text)
            .ok_or_else(|| self.error(&token, format!("unknown register '{}'", token.text)))
    }

    fn parse_immediate(&mut self) -> Result<Word, AsmError> {
        if !self.check(TokenKind::Immediate) {
            let token = self.peek().clone();
            return Err(self.error(&token, "expected immediate".to_string()));
        }
        let token = self.advance().clone();
        token
            .value
            .ok_or_else(|| self.error(&token, "immediate token missing value".to_string()))
    }

    // -- Token navigation --

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::EndOfFile
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.current)
            .unwrap_or_else(|| self.tokens.last().expect("EOF token present"))
    }

    fn advance(&mut self) -> &Token {
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn check(&self, kind: TokenKind) -> bool {
        !self.is_at_end() && self.peek().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<(), AsmError> {
        if self.check(kind) {
            self.advance();
            return Ok(());
        }
        let token = self.peek().clone();
        Err(self.error(&token, message.to_string()))
    }

    fn error(&self, token: &Token, message: String) -> AsmError {
        AsmError {
            stage: Stage::Parser,
            line: token.line,
            message,
        }
    }
}

/// Map a mnemonic (any case) to its opcode.
fn mnemonic_to_opcode(text: &str) -> Option<Opcode> {
    Some(match text.to_ascii_uppercase().as_str() {
        "NOP" => Opcode::Nop,
        "ADD" => Opcode::Add,
        "SUB" => Opcode::Sub,
        "AND" => Opcode::And,
        "OR" => Opcode::Or,
        "XOR" => Opcode::Xor,
        "LSL" => Opcode::Lsl,
        "LSR" => Opcode::Lsr,
        "ASR" => Opcode::Asr,
        "CMP" => Opcode::Cmp,
        "LDR" => Opcode::Ldr,
        "STR" => Opcode::Str,
        "MOV" => Opcode::Mov,
        "B" => Opcode::B,
        "BEQ" => Opcode::Beq,
        "BNE" => Opcode::Bne,
        "HALT" => Opcode::Halt,
        _ => return None,
    })
}

/// Resolve a register token to its index. SP and LR alias R30/R31; PC is
/// index 32, outside the register file, and rejected later by the encoder's
/// field-width check.
fn register_index(text: &str) -> Option<u8> {
    let upper = text.to_ascii_uppercase();
    match upper.as_str() {
        "SP" => Some(30),
        "LR" => Some(31),
        "PC" => Some(32),
        _ => upper
            .strip_prefix('R')
            .and_then(|digits| digits.parse::<u8>().ok()),
    }
}
