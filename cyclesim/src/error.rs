//! Layered error types for the simulator core.
//!
//! Each subsystem owns a leaf error (`MemoryError` here; `AssembleError` in
//! [`crate::assembler`]). [`SimulatorError`] composes them at the point
//! where subsystems meet, mirroring how an interpreter-level error wraps the
//! lower-level failures that can cause it.

use thiserror::Error;

/// Failures from the cache/memory hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MemoryError {
    /// A read or write addressed a word index outside `[0, memory_size)`.
    #[error("word index {word_idx} is out of range for a memory of {memory_size} words")]
    OutOfRange { word_idx: u32, memory_size: usize },
}

/// The top-level error a caller of [`crate::Machine`] may observe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimulatorError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Decode(#[from] cyclesim_asm::DecodeError),

    #[error("assembly failed with {0} error(s)")]
    Assembly(usize),
}
