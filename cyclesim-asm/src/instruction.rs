//! The decoded instruction record and its bit-exact codec.

use core::fmt;

use crate::bits::sign_extend;
use crate::error::DecodeError;
use crate::opcode::{ArithmeticOp, ControlOp, Format, MemoryOp, Opcode};

const ARITH_IMM_WIDTH: u32 = 10;
const MEM_IMM_WIDTH: u32 = 18;
const CTRL_IMM_WIDTH: u32 = 27;

/// A fully decoded 32-bit instruction word.
///
/// Every field is present regardless of format; fields a given opcode does
/// not use are zero, matching the encode/decode round-trip rule: "unused
/// fields are zero".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    pub opcode: Opcode,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i32,
}

const REG_MASK: u32 = 0b1_1111;

impl Instruction {
    /// Encodes this instruction to its 32-bit word representation.
    pub fn encode(self) -> u32 {
        let format_bits = self.opcode.format().bits();
        match self.opcode {
            Opcode::Arithmetic(op) => {
                (format_bits << 30)
                    | ((op as u32) << 25)
                    | ((self.rd as u32 & REG_MASK) << 20)
                    | ((self.rs1 as u32 & REG_MASK) << 15)
                    | ((self.rs2 as u32 & REG_MASK) << 10)
                    | (imm_field(self.imm, ARITH_IMM_WIDTH))
            }
            Opcode::Memory(op) => {
                (format_bits << 30)
                    | ((op as u32) << 28)
                    | ((self.rd as u32 & REG_MASK) << 23)
                    | ((self.rs1 as u32 & REG_MASK) << 18)
                    | (imm_field(self.imm, MEM_IMM_WIDTH))
            }
            Opcode::Control(op) => {
                let tail = if op.is_register_form() {
                    (self.rs1 as u32 & REG_MASK) << 22
                } else {
                    imm_field(self.imm, CTRL_IMM_WIDTH)
                };
                (format_bits << 30) | ((op as u32) << 27) | tail
            }
        }
    }

    /// Decodes a 32-bit word into an instruction record.
    ///
    /// Fails if the format or opcode bits do not match a known opcode;
    /// never panics on malformed input.
    pub fn decode(word: u32) -> Result<Self, DecodeError> {
        let format = Format::from_bits(word >> 30)?;
        match format {
            Format::Arithmetic => {
                let opcode_bits = ((word >> 25) & 0b1_1111) as u8;
                let op = match Opcode::decode(format, opcode_bits)? {
                    Opcode::Arithmetic(op) => op,
                    _ => unreachable!("Opcode::decode respects the requested format"),
                };
                Ok(Instruction {
                    opcode: Opcode::Arithmetic(op),
                    rd: ((word >> 20) & REG_MASK) as u8,
                    rs1: ((word >> 15) & REG_MASK) as u8,
                    rs2: ((word >> 10) & REG_MASK) as u8,
                    imm: sign_extend(word & 0x3FF, ARITH_IMM_WIDTH),
                })
            }
            Format::Memory => {
                let opcode_bits = ((word >> 28) & 0b11) as u8;
                let op = match Opcode::decode(format, opcode_bits)? {
                    Opcode::Memory(op) => op,
                    _ => unreachable!("Opcode::decode respects the requested format"),
                };
                Ok(Instruction {
                    opcode: Opcode::Memory(op),
                    rd: ((word >> 23) & REG_MASK) as u8,
                    rs1: ((word >> 18) & REG_MASK) as u8,
                    rs2: 0,
                    imm: sign_extend(word & 0x3FFFF, MEM_IMM_WIDTH),
                })
            }
            Format::Control => {
                let opcode_bits = ((word >> 27) & 0b111) as u8;
                let op = match Opcode::decode(format, opcode_bits)? {
                    Opcode::Control(op) => op,
                    _ => unreachable!("Opcode::decode respects the requested format"),
                };
                let (rs1, imm) = if op.is_register_form() {
                    (((word >> 22) & REG_MASK) as u8, 0)
                } else {
                    (0, sign_extend(word & 0x7FF_FFFF, CTRL_IMM_WIDTH))
                };
                Ok(Instruction {
                    opcode: Opcode::Control(op),
                    rd: 0,
                    rs1,
                    rs2: 0,
                    imm,
                })
            }
        }
    }
}

/// Masks a signed immediate down to its field width, ready to be OR'd in place.
fn imm_field(imm: i32, width: u32) -> u32 {
    (imm as u32) & (u32::MAX >> (32 - width))
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rd = self.rd;
        let rs1 = self.rs1;
        let rs2 = self.rs2;
        let imm = self.imm;
        match self.opcode {
            Opcode::Arithmetic(ArithmeticOp::Cmp) => write!(f, "cmp r{rs1}, r{rs2}"),
            Opcode::Arithmetic(ArithmeticOp::Mov) => write!(f, "mov r{rd}, r{rs1}"),
            Opcode::Arithmetic(ArithmeticOp::Movi) => write!(f, "movi r{rd}, {imm}"),
            Opcode::Arithmetic(op @ (ArithmeticOp::Shl | ArithmeticOp::Shr)) => {
                write!(f, "{} r{rd}, r{rs1}, {imm}", mnemonic_arith(op))
            }
            Opcode::Arithmetic(op) if op.rs2_is_immediate() => {
                write!(f, "{} r{rd}, r{rs1}, {imm}", mnemonic_arith(op))
            }
            Opcode::Arithmetic(op) => write!(f, "{} r{rd}, r{rs1}, r{rs2}", mnemonic_arith(op)),
            Opcode::Memory(MemoryOp::Ldr) => write!(f, "ldr r{rd}, [r{rs1}, {imm}]"),
            // STR's encoded `rd` field carries the value register, not a destination.
            Opcode::Memory(MemoryOp::Str) => write!(f, "str r{rd}, [r{rs1}, {imm}]"),
            Opcode::Control(op) if op.is_register_form() => {
                write!(f, "{} r{rs1}", mnemonic_ctrl(op))
            }
            Opcode::Control(op) => write!(f, "{} {imm}", mnemonic_ctrl(op)),
        }
    }
}

fn mnemonic_arith(op: ArithmeticOp) -> &'static str {
    use ArithmeticOp::*;
    match op {
        Add => "add",
        Adds => "adds",
        Addi => "addi",
        Addis => "addis",
        Sub => "sub",
        Subs => "subs",
        Subi => "subi",
        Subis => "subis",
        Mul => "mul",
        Muli => "muli",
        Div => "div",
        Divi => "divi",
        And => "and",
        Andi => "andi",
        Or => "or",
        Ori => "ori",
        Xor => "xor",
        Xori => "xori",
        Shl => "shl",
        Shr => "shr",
        Cmp => "cmp",
        Mod => "mod",
        Modi => "modi",
        Mov => "mov",
        Movi => "movi",
    }
}

fn mnemonic_ctrl(op: ControlOp) -> &'static str {
    match op {
        ControlOp::Jmp => "jmp",
        ControlOp::Beq => "beq",
        ControlOp::Blt => "blt",
        ControlOp::Cal => "cal",
        ControlOp::Flush => "flush",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Opcode::Arithmetic(ArithmeticOp::Add), 1, 2, 3, 0)]
    #[case(Opcode::Arithmetic(ArithmeticOp::Addi), 1, 2, 0, 511)]
    #[case(Opcode::Arithmetic(ArithmeticOp::Addi), 1, 2, 0, -512)]
    #[case(Opcode::Arithmetic(ArithmeticOp::Cmp), 0, 1, 2, 0)]
    #[case(Opcode::Memory(MemoryOp::Ldr), 3, 1, 0, 100)]
    #[case(Opcode::Memory(MemoryOp::Str), 4, 1, 0, -5)]
    #[case(Opcode::Control(ControlOp::Jmp), 0, 5, 0, 0)]
    #[case(Opcode::Control(ControlOp::Beq), 0, 0, 0, -1)]
    fn round_trips(
        #[case] opcode: Opcode,
        #[case] rd: u8,
        #[case] rs1: u8,
        #[case] rs2: u8,
        #[case] imm: i32,
    ) {
        let original = Instruction {
            opcode,
            rd,
            rs1,
            rs2,
            imm,
        };
        let decoded = Instruction::decode(original.encode()).expect("valid instruction decodes");
        assert_eq!(decoded, original);
    }

    #[test]
    fn unknown_format_is_rejected() {
        // top two bits `11` select no format.
        let word = 0b11 << 30;
        assert!(matches!(
            Instruction::decode(word),
            Err(DecodeError::UnknownFormat { .. })
        ));
    }

    #[test]
    fn disassembly_matches_canonical_form() {
        let add = Instruction {
            opcode: Opcode::Arithmetic(ArithmeticOp::Add),
            rd: 1,
            rs1: 2,
            rs2: 3,
            imm: 0,
        };
        assert_eq!(add.to_string(), "add r1, r2, r3");

        let ldr = Instruction {
            opcode: Opcode::Memory(MemoryOp::Ldr),
            rd: 3,
            rs1: 1,
            rs2: 0,
            imm: 10,
        };
        assert_eq!(ldr.to_string(), "ldr r3, [r1, 10]");

        let beq = Instruction {
            opcode: Opcode::Control(ControlOp::Beq),
            rd: 0,
            rs1: 0,
            rs2: 0,
            imm: -1,
        };
        assert_eq!(beq.to_string(), "beq -1");
    }
}
