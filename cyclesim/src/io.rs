//! Reading and writing the two on-disk formats (§6.4): `.asm` source text
//! and the raw little-endian `.bin` word stream. Thin I/O helpers only —
//! the formats themselves have no representation in the core types.

use std::fs;
use std::io::{self, Read as _, Write as _};
use std::path::Path;

use thiserror::Error;

use crate::assembler::{AssembleError, Assembler};

/// Failures from the file-level helpers in this module.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IoError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} assembly error(s) in source file")]
    Assembly(usize),

    #[error("binary program file length {len} is not a multiple of 4 bytes")]
    MisalignedBinary { len: usize },
}

/// Assembles a `.asm` source file straight into its word stream. Returns
/// every assembly error found rather than stopping at the first; a
/// non-empty error list comes back alongside whatever did assemble.
pub fn assemble_file(path: impl AsRef<Path>) -> Result<(Vec<u32>, Vec<AssembleError>), IoError> {
    let source = fs::read_to_string(path)?;
    Ok(Assembler::new().assemble(&source))
}

/// Like [`assemble_file`], but fails on the first error instead of
/// returning the partial result.
pub fn assemble_file_strict(path: impl AsRef<Path>) -> Result<Vec<u32>, IoError> {
    let (words, errors) = assemble_file(path)?;
    if !errors.is_empty() {
        return Err(IoError::Assembly(errors.len()));
    }
    Ok(words)
}

/// Reads a raw little-endian `.bin` word stream produced by [`write_binary`].
pub fn read_binary(path: impl AsRef<Path>) -> Result<Vec<u32>, IoError> {
    let mut bytes = Vec::new();
    fs::File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(IoError::MisalignedBinary { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Writes `words` as a raw little-endian `.bin` word stream.
pub fn write_binary(path: impl AsRef<Path>, words: &[u32]) -> Result<(), IoError> {
    let mut file = fs::File::create(path)?;
    for word in words {
        file.write_all(&word.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trips_through_a_temp_file() {
        let words = [0xDEAD_BEEFu32, 0, 1, 0xFFFF_FFFF];
        let path = std::env::temp_dir().join("cyclesim_io_round_trip_test.bin");
        write_binary(&path, &words).unwrap();
        let read_back = read_binary(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(read_back, words);
    }

    #[test]
    fn misaligned_binary_is_rejected() {
        let path = std::env::temp_dir().join("cyclesim_io_misaligned_test.bin");
        fs::write(&path, [0u8, 1, 2]).unwrap();
        let err = read_binary(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, IoError::MisalignedBinary { len: 3 }));
    }
}
