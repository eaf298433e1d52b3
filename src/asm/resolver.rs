//! Assembler resolver.
//!
//! Two passes over the AST. Pass one builds the symbol table, assigning
//! each label the byte address `4 × instruction-index`. Pass two rewrites
//! every label operand: branch opcodes get a PC-relative byte offset
//! (checked against the signed 11-bit range), everything else gets the
//! absolute address.
//!
//! The CPU adds the branch offset to the branch's own PC during Execute,
//! so the offset is simply `target − current`, both in bytes.

use std::collections::HashMap;

use crate::core::Address;

use super::parser::{LabelDef, Operand, ParsedInstruction, Program};
use super::{AsmError, Stage};

/// Mapping from label name to byte address.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Address>,
}

impl SymbolTable {
    pub fn define(&mut self, name: &str, address: Address) {
        self.symbols.insert(name.to_string(), address);
    }

    pub fn resolve(&self, name: &str) -> Option<Address> {
        self.symbols.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }
}

/// Resolve all label operands in `program`, in place.
pub fn resolve(program: &mut Program) -> Result<(), AsmError> {
    let symbols = build_symbol_table(&program.labels)?;
    resolve_operands(&mut program.instructions, &symbols)
}

fn build_symbol_table(labels: &[LabelDef]) -> Result<SymbolTable, AsmError> {
    let mut table = SymbolTable::default();
    for label in labels {
        if table.contains(&label.name) {
            return Err(AsmError {
                stage: Stage::Resolver,
                line: 0,
                message: format!("duplicate label definition '{}'", label.name),
            });
        }
        table.define(&label.name, (label.instruction_index * 4) as Address);
    }
    Ok(table)
}

fn resolve_operands(
    instructions: &mut [ParsedInstruction],
    symbols: &SymbolTable,
) -> Result<(), AsmError> {
    for (index, instr) in instructions.iter_mut().enumerate() {
        let current_addr = (index * 4) as i64;
        let is_branch = instr.op.is_branch();

        for operand in &mut instr.operands {
            let Operand::Label(name) = operand else {
                continue;
            };
            let Some(target) = symbols.resolve(name) else {
                return Err(AsmError {
                    stage: Stage::Resolver,
                    line: instr.line,
                    message: format!("undefined symbol '{name}'"),
                });
            };

            if is_branch {
                let offset = target as i64 - current_addr;
                if !(-1024..=1023).contains(&offset) {
                    return Err(AsmError {
                        stage: Stage::Resolver,
                        line: instr.line,
                        message: format!(
                            "branch target out of range ({offset} bytes, must be in [-1024, +1023])"
                        ),
                    });
                }
                // Stored as the two's-complement bit pattern; the encoder
                // packs the low 11 bits.
                *operand = Operand::Immediate(offset as u64);
            } else {
                // Absolute address for non-branch consumers (reserved for
                // future data-directive addressing).
                *operand = Operand::Immediate(target);
            }
        }
    }
    Ok(())
}
