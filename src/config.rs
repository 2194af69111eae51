use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::io_ext::MAX_U48;

pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024; // 1 MiB

/// Appended to the content file path to name its index file.
pub const INDEX_SUFFIX: &str = ".index";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    /// Read-write. Creates the content file (and its index, for fresh datasets) if missing.
    ReadWrite,
}

impl Mode {
    pub fn is_writable(self) -> bool {
        self == Mode::ReadWrite
    }
}

/// Options for opening an [`IndexedFile`](crate::IndexedFile).
///
/// ```ignore
/// let file = IndexedFile::new("data", Options::default().block_size(4096).writable(true))?;
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) block_size: u64,
    pub(crate) writable: bool,
    pub(crate) directory: Option<PathBuf>,
    pub(crate) rmdir: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            writable: false,
            directory: None,
            rmdir: false,
        }
    }
}

impl Options {
    /// Block size for a dataset created by this open. Ignored once an index exists,
    /// the persisted value wins.
    pub fn block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Open read-write right away instead of trying read-only first.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Base directory the dataset path is resolved against. Also bounds `rmdir` cleanup.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Remove empty parent directories (up to `directory`) on destroy.
    pub fn rmdir(mut self, rmdir: bool) -> Self {
        self.rmdir = rmdir;
        self
    }

    pub fn preferred_mode(&self) -> Mode {
        if self.writable {
            Mode::ReadWrite
        } else {
            Mode::ReadOnly
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_U48 {
            return Err(Error::InvalidBlockSize(self.block_size));
        }

        Ok(())
    }
}
