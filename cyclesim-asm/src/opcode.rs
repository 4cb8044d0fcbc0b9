//! Instruction formats and opcode enumerations.
//!
//! The top two bits of every 32-bit instruction word select a [`Format`].
//! Each format then carries its own fixed-width opcode field. To give every
//! opcode a single globally-unique identifier (several formats reuse small
//! opcode numbers), [`Opcode::global_tag`] folds the format into the value:
//! `global_tag = (format_bits << 5) | opcode_bits`.

use crate::error::DecodeError;

/// The three instruction formats, keyed by the word's top two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Format {
    Arithmetic = 0b00,
    Memory = 0b01,
    Control = 0b10,
}

impl Format {
    /// Recovers a format from the word's top-two-bit field.
    pub(crate) fn from_bits(bits: u32) -> Result<Self, DecodeError> {
        match bits {
            0b00 => Ok(Format::Arithmetic),
            0b01 => Ok(Format::Memory),
            0b10 => Ok(Format::Control),
            _ => Err(DecodeError::UnknownFormat { word: bits << 30 }),
        }
    }

    pub(crate) const fn bits(self) -> u32 {
        self as u32
    }
}

/// Arithmetic-format opcodes (format `00`, 5-bit opcode field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ArithmeticOp {
    Add = 0,
    Adds = 1,
    Addi = 2,
    Addis = 3,
    Sub = 4,
    Subs = 5,
    Subi = 6,
    Subis = 7,
    Mul = 8,
    Muli = 9,
    Div = 10,
    Divi = 11,
    And = 12,
    Andi = 13,
    Or = 14,
    Ori = 15,
    Xor = 16,
    Xori = 17,
    Shl = 18,
    Shr = 19,
    Cmp = 20,
    Mod = 21,
    Modi = 22,
    Mov = 23,
    Movi = 24,
}

impl ArithmeticOp {
    /// Opcodes whose result updates the flags word.
    pub const fn updates_flags(self) -> bool {
        matches!(
            self,
            ArithmeticOp::Adds | ArithmeticOp::Addis | ArithmeticOp::Subs
                | ArithmeticOp::Subis
                | ArithmeticOp::Cmp
        )
    }

    /// `CMP` computes flags but writes no register.
    pub const fn writes_register(self) -> bool {
        !matches!(self, ArithmeticOp::Cmp)
    }

    /// Whether the second source operand is an immediate rather than a register.
    pub const fn rs2_is_immediate(self) -> bool {
        matches!(
            self,
            ArithmeticOp::Addi
                | ArithmeticOp::Addis
                | ArithmeticOp::Subi
                | ArithmeticOp::Subis
                | ArithmeticOp::Muli
                | ArithmeticOp::Divi
                | ArithmeticOp::Andi
                | ArithmeticOp::Ori
                | ArithmeticOp::Xori
                | ArithmeticOp::Modi
                | ArithmeticOp::Movi
        )
    }

    fn from_bits(bits: u8) -> Option<Self> {
        use ArithmeticOp::*;
        Some(match bits {
            0 => Add,
            1 => Adds,
            2 => Addi,
            3 => Addis,
            4 => Sub,
            5 => Subs,
            6 => Subi,
            7 => Subis,
            8 => Mul,
            9 => Muli,
            10 => Div,
            11 => Divi,
            12 => And,
            13 => Andi,
            14 => Or,
            15 => Ori,
            16 => Xor,
            17 => Xori,
            18 => Shl,
            19 => Shr,
            20 => Cmp,
            21 => Mod,
            22 => Modi,
            23 => Mov,
            24 => Movi,
            _ => return None,
        })
    }
}

/// Memory-format opcodes (format `01`, 2-bit opcode field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MemoryOp {
    Ldr = 0,
    Str = 1,
}

impl MemoryOp {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(MemoryOp::Ldr),
            1 => Some(MemoryOp::Str),
            _ => None,
        }
    }
}

/// Control-format opcodes (format `10`, 3-bit opcode field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ControlOp {
    Jmp = 0,
    Beq = 1,
    Blt = 2,
    Cal = 3,
    Flush = 4,
}

impl ControlOp {
    /// Register-form control ops carry `rs1`; immediate-form ops carry `imm`.
    pub const fn is_register_form(self) -> bool {
        matches!(self, ControlOp::Jmp | ControlOp::Cal | ControlOp::Flush)
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(ControlOp::Jmp),
            1 => Some(ControlOp::Beq),
            2 => Some(ControlOp::Blt),
            3 => Some(ControlOp::Cal),
            4 => Some(ControlOp::Flush),
            _ => None,
        }
    }
}

/// A format-tagged opcode, unique across all three formats via [`Opcode::global_tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    Arithmetic(ArithmeticOp),
    Memory(MemoryOp),
    Control(ControlOp),
}

impl Opcode {
    pub const fn format(self) -> Format {
        match self {
            Opcode::Arithmetic(_) => Format::Arithmetic,
            Opcode::Memory(_) => Format::Memory,
            Opcode::Control(_) => Format::Control,
        }
    }

    const fn opcode_bits(self) -> u8 {
        match self {
            Opcode::Arithmetic(op) => op as u8,
            Opcode::Memory(op) => op as u8,
            Opcode::Control(op) => op as u8,
        }
    }

    /// `(format_bits << 5) | opcode_bits`, unique across every opcode this machine defines.
    pub const fn global_tag(self) -> u8 {
        ((self.format().bits() as u8) << 5) | self.opcode_bits()
    }

    pub(crate) fn decode(format: Format, opcode_bits: u8) -> Result<Self, DecodeError> {
        let opcode = match format {
            Format::Arithmetic => ArithmeticOp::from_bits(opcode_bits).map(Opcode::Arithmetic),
            Format::Memory => MemoryOp::from_bits(opcode_bits).map(Opcode::Memory),
            Format::Control => ControlOp::from_bits(opcode_bits).map(Opcode::Control),
        };
        opcode.ok_or(DecodeError::UnknownOpcode {
            format,
            opcode_bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_tag_matches_format_fold() {
        assert_eq!(Opcode::Arithmetic(ArithmeticOp::Add).global_tag(), 0);
        assert_eq!(Opcode::Arithmetic(ArithmeticOp::Movi).global_tag(), 24);
        assert_eq!(Opcode::Memory(MemoryOp::Ldr).global_tag(), 0b01_00000);
        assert_eq!(Opcode::Memory(MemoryOp::Str).global_tag(), 0b01_00001);
        assert_eq!(Opcode::Control(ControlOp::Jmp).global_tag(), 0b10_00000);
        assert_eq!(Opcode::Control(ControlOp::Flush).global_tag(), 0b10_00100);
    }

    #[test]
    fn cmp_writes_no_register_but_updates_flags() {
        assert!(!ArithmeticOp::Cmp.writes_register());
        assert!(ArithmeticOp::Cmp.updates_flags());
    }
}
