use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("could not satisfy length: {len} bytes at offset {offset}")]
    RangeNotSatisfiable { offset: u64, len: u64 },

    #[error("failed to write index slot {slot}: wrote {written} of 6 bytes")]
    IndexWrite { slot: u64, written: usize },

    #[error("corrupt index header: {0}")]
    CorruptIndex(String),

    #[error("value {0} does not fit in 48 bits")]
    ValueOutOfRange(u64),

    #[error("block address space exhausted")]
    AddressSpaceExhausted,

    #[error("range of {len} bytes at offset {offset} overflows")]
    Overflow { offset: u64, len: u64 },

    #[error("invalid block size {0}")]
    InvalidBlockSize(u64),

    #[error("unexpected {0} response")]
    UnexpectedResponse(&'static str),

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl Error {
    pub fn is_range_not_satisfiable(&self) -> bool {
        matches!(self, Error::RangeNotSatisfiable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
