//! Errors produced while decoding or encoding machine words.

use thiserror::Error;

/// Failure modes of [`crate::Instruction::decode`](crate::Instruction::decode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The two top bits of the word did not select a known [`Format`](crate::Format).
    #[error("word {word:#010x} has no instruction format")]
    UnknownFormat { word: u32 },

    /// The format was recognised but its opcode bits matched no opcode in that format.
    #[error("opcode bits {opcode_bits:#04x} are not defined for format {format:?}")]
    UnknownOpcode {
        format: crate::Format,
        opcode_bits: u8,
    },
}
