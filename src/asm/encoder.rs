//! Assembler encoder.
//!
//! The final stage: validates each resolved instruction's operand shape
//! against its opcode's expected pattern, then assembles the 32-bit word
//! and emits it in little-endian byte order. Immediates are range-checked
//! here (unsigned in [0, 2047], signed offsets in [-1024, +1023]) so a
//! malformed program can never produce a semantically wrong binary.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::cpu::{isa, Opcode};

use super::parser::{Operand, ParsedInstruction};
use super::{AsmError, Stage};

/// Encode all instructions into machine code.
pub fn encode(instructions: &[ParsedInstruction]) -> Result<Vec<u8>, AsmError> {
    let mut binary = Vec::with_capacity(instructions.len() * 4);
    for instr in instructions {
        let word = encode_instruction(instr)?;
        binary
            .write_u32::<LittleEndian>(word)
            .expect("writing to a Vec cannot fail");
    }
    Ok(binary)
}

fn encode_instruction(instr: &ParsedInstruction) -> Result<u32, AsmError> {
    let mut rd = 0u8;
    let mut rn = 0u8;
    let mut rm = 0u8;
    let mut imm = 0u32;

    match instr.op {
        // 0-operand control instructions.
        Opcode::Nop | Opcode::Halt => {
            if !instr.operands.is_empty() {
                return Err(error(instr, format!("{} takes no operands", instr.mnemonic)));
            }
        }

        // Branches: one immediate operand, the PC-relative byte offset the
        // resolver computed.
        Opcode::B | Opcode::Beq | Opcode::Bne => {
            let [offset_op] = expect_operands::<1>(instr)?;
            let Operand::Immediate(value) = offset_op else {
                return Err(error(
                    instr,
                    format!("{} operand must be an immediate offset or label", instr.mnemonic),
                ));
            };
            imm = signed_11(instr, *value as i64)?;
        }

        // MOV Rd, (Rm | #imm). Rn is unused and encodes as zero.
        Opcode::Mov => {
            let [dst, src] = expect_operands::<2>(instr)?;
            rd = register(instr, dst, "destination")?;
            match src {
                Operand::Register(index) => rm = check_register(instr, *index)?,
                Operand::Immediate(value) => imm = unsigned_11(instr, *value)?,
                _ => {
                    return Err(error(
                        instr,
                        "MOV source must be a register or immediate".to_string(),
                    ));
                }
            }
        }

        // CMP Rn, (Rm | #imm). Flags only: Rd encodes as zero.
        Opcode::Cmp => {
            let [lhs, rhs] = expect_operands::<2>(instr)?;
            rn = register(instr, lhs, "first")?;
            match rhs {
                Operand::Register(index) => rm = check_register(instr, *index)?,
                Operand::Immediate(value) => imm = unsigned_11(instr, *value)?,
                _ => {
                    return Err(error(
                        instr,
                        "CMP second operand must be a register or immediate".to_string(),
                    ));
                }
            }
        }

        // LDR/STR Rd, [Rn, #offset].
        Opcode::Ldr | Opcode::Str => {
            let [data_op, addr_op] = expect_operands::<2>(instr)?;
            rd = register(instr, data_op, "data")?;
            let Operand::Memory { base, offset, .. } = addr_op else {
                return Err(error(
                    instr,
                    format!("{} address operand must use [Rn, #offset] syntax", instr.mnemonic),
                ));
            };
            rn = check_register(instr, *base)?;
            imm = signed_11(instr, *offset)?;
        }

        // Three-operand ALU instructions: Rd, Rn, (Rm | #imm).
        _ => {
            let [dst, lhs, rhs] = expect_operands::<3>(instr)?;
            rd = register(instr, dst, "destination")?;
            rn = register(instr, lhs, "first source")?;
            match rhs {
                Operand::Register(index) => rm = check_register(instr, *index)?,
                Operand::Immediate(value) => imm = unsigned_11(instr, *value)?,
                _ => {
                    return Err(error(
                        instr,
                        format!(
                            "{} second source must be a register or immediate",
                            instr.mnemonic
                        ),
                    ));
                }
            }
        }
    }

    Ok(isa::pack(instr.op, rd, rn, rm, imm))
}

fn expect_operands<const N: usize>(
    instr: &ParsedInstruction,
) -> Result<[&Operand; N], AsmError> {
    if instr.operands.len() != N {
        return Err(error(
            instr,
            format!(
                "{} requires exactly {} operand{}, found {}",
                instr.mnemonic,
                N,
                if N == 1 { "" } else { "s" },
                instr.operands.len()
            ),
        ));
    }
    let mut iter = instr.operands.iter();
    Ok([(); N].map(|()| iter.next().expect("length checked")))
}

fn register(
    instr: &ParsedInstruction,
    operand: &Operand,
    role: &str,
) -> Result<u8, AsmError> {
    let Operand::Register(index) = operand else {
        return Err(error(
            instr,
            format!("{} {role} operand must be a register", instr.mnemonic),
        ));
    };
    check_register(instr, *index)
}

/// Register fields are five bits: indices above 31 (the PC pseudo-register
/// included) cannot be encoded.
fn check_register(instr: &ParsedInstruction, index: u8) -> Result<u8, AsmError> {
    if index >= 32 {
        return Err(error(
            instr,
            format!("register index {index} cannot be encoded in a 5-bit field"),
        ));
    }
    Ok(index)
}

fn unsigned_11(instr: &ParsedInstruction, value: u64) -> Result<u32, AsmError> {
    if value > 2047 {
        return Err(error(
            instr,
            format!("immediate out of range: {value} (must be in [0, 2047])"),
        ));
    }
    Ok(value as u32)
}

fn signed_11(instr: &ParsedInstruction, value: i64) -> Result<u32, AsmError> {
    if !(-1024..=1023).contains(&value) {
        return Err(error(
            instr,
            format!("offset out of range: {value} (must be in [-1024, +1023])"),
        ));
    }
    // Two's-complement representation packed into the low 11 bits.
    Ok((value as u32) & 0x7FF)
}

fn error(instr: &ParsedInstruction, message: String) -> AsmError {
    AsmError {
        stage: Stage::Encoder,
        line: instr.line,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;
    use crate::asm::parser::Parser;
    use crate::asm::resolver;

    fn encode_source(source: &str) -> Result<Vec<u8>, AsmError> {
        let mut program = Parser::new(Lexer::new(source).tokenize()).parse()?;
        resolver::resolve(&mut program)?;
        encode(&program.instructions)
    }

    fn encode_word(source: &str) -> u32 {
        let bytes = encode_source(source).unwrap();
        u32::from_le_bytes(bytes[..4].try_into().unwrap())
    }

    #[test]
    fn test_add_register_form() {
        let bytes = encode_source("ADD R1, R2, R3\n").unwrap();
        assert_eq!(bytes, vec![0x00, 0x18, 0x22, 0x04]);
        assert_eq!(encode_word("ADD R1, R2, R3\n"), 0x0422_1800);
    }

    #[test]
    fn test_mov_immediate_form() {
        assert_eq!(encode_word("MOV R5, #255\n"), 0x80A0_00FF);
    }

    #[test]
    fn test_ldr_memory_form() {
        assert_eq!(encode_word("LDR R10, [R1, #16]\n"), 0x4141_0010);
    }

    #[test]
    fn test_str_negative_offset() {
        // -4 packs as 0x7FC in the low 11 bits.
        let word = encode_word("STR R2, [R3, #-4]\n");
        assert_eq!(word & 0x7FF, 0x7FC);
        assert_eq!(word >> 26, 0x11);
    }

    #[test]
    fn test_alu_immediate_form() {
        let word = encode_word("SUB R1, R1, #1\n");
        assert_eq!(word & 0x7FF, 1);
        assert_eq!(word >> 26, 0x02);
    }

    #[test]
    fn test_cmp_uses_rn_field() {
        let word = encode_word("CMP R4, #7\n");
        assert_eq!((word >> 21) & 0x1F, 0, "Rd must be zero");
        assert_eq!((word >> 16) & 0x1F, 4, "first operand goes to Rn");
        assert_eq!(word & 0x7FF, 7);
    }

    #[test]
    fn test_nop_halt_reject_operands() {
        assert!(encode_source("NOP R1\n").is_err());
        assert!(encode_source("HALT #1\n").is_err());
    }

    #[test]
    fn test_mov_immediate_range() {
        assert!(encode_source("MOV R0, #2047\n").is_ok());
        let err = encode_source("MOV R0, #2048\n").unwrap_err();
        assert!(err.to_string().contains("2048"), "{err}");
    }

    #[test]
    fn test_ldr_offset_range() {
        assert!(encode_source("LDR R0, [R1, #1023]\n").is_ok());
        assert!(encode_source("LDR R0, [R1, #-1024]\n").is_ok());
        assert!(encode_source("LDR R0, [R1, #1024]\n").is_err());
        assert!(encode_source("LDR R0, [R1, #-1025]\n").is_err());
    }

    #[test]
    fn test_ldr_requires_memory_syntax() {
        let err = encode_source("LDR R0, R1\n").unwrap_err();
        assert!(err.to_string().contains("[Rn, #offset]"), "{err}");
    }

    #[test]
    fn test_pc_cannot_be_encoded() {
        let err = encode_source("MOV PC, #0\n").unwrap_err();
        assert!(err.to_string().contains("5-bit"), "{err}");
    }

    #[test]
    fn test_wrong_operand_count() {
        let err = encode_source("ADD R1, R2\n").unwrap_err();
        assert!(err.to_string().contains("exactly 3"), "{err}");
    }

    #[test]
    fn test_branch_encodes_resolved_offset() {
        let bytes = encode_source("B skip\nNOP\nskip:\nHALT\n").unwrap();
        let word = u32::from_le_bytes(bytes[..4].try_into().unwrap());
        assert_eq!(word >> 26, 0x30);
        assert_eq!(word & 0x7FF, 8);
    }

    #[test]
    fn test_error_reports_encoder_stage_and_line() {
        let err = encode_source("NOP\nMOV R0, #9999\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_string().starts_with("[Line 2] Encoder:"), "{err}");
    }
}
