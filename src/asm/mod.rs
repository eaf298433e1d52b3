//! Four-stage assembler: lex → parse → resolve → encode.
//!
//! Each stage refuses to advance past its first error and reports the
//! offending line, so diagnostics always identify a single failure with its
//! stage. [`assemble`] runs the whole pipeline and returns the flat output
//! image: the 32-bit little-endian instruction stream followed by the data
//! segment, with no header.

pub mod encoder;
pub mod lexer;
pub mod parser;
pub mod resolver;

use std::fmt;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{LabelDef, Operand, ParsedInstruction, Parser, Program};
pub use resolver::SymbolTable;

/// Pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lexer,
    Parser,
    Resolver,
    Encoder,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lexer => "Lexer",
            Stage::Parser => "Parser",
            Stage::Resolver => "Resolver",
            Stage::Encoder => "Encoder",
        };
        f.write_str(name)
    }
}

/// A single assembler diagnostic: stage, line, and description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[Line {line}] {stage}: {message}")]
pub struct AsmError {
    pub stage: Stage,
    pub line: usize,
    pub message: String,
}

/// A fully assembled program.
#[derive(Debug, Clone, Default)]
pub struct AssembledImage {
    /// Encoded instruction stream (4 bytes per instruction, little-endian).
    pub text: Vec<u8>,
    /// Bytes accumulated by `.string` directives.
    pub data: Vec<u8>,
}

impl AssembledImage {
    /// The flat binary image: text followed immediately by data.
    pub fn image(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(self.text.len() + self.data.len());
        image.extend_from_slice(&self.text);
        image.extend_from_slice(&self.data);
        image
    }
}

/// Run the full pipeline over `source`.
pub fn assemble(source: &str) -> Result<AssembledImage, AsmError> {
    let tokens = Lexer::new(source).tokenize();
    let mut program = Parser::new(tokens).parse()?;
    resolver::resolve(&mut program)?;
    let text = encoder::encode(&program.instructions)?;
    Ok(AssembledImage {
        text,
        data: program.data_segment,
    })
}
