use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum FuzzError {
    #[error("Block size must be greater than zero")]
    ZeroBlockSize,
    #[error("Fuzz output I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seeded generator of random input files for the target.
///
/// Output is written in whole blocks until at least `max_bytes` bytes have
/// been produced. The same seed always yields the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuzzFile {
    pub seed: u64,
    pub block_size: usize,
    pub max_bytes: usize,
}

impl FuzzFile {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            block_size: DEFAULT_BLOCK_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Writes the fuzz data to `out` and returns the number of bytes written.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<usize, FuzzError> {
        if self.block_size == 0 {
            return Err(FuzzError::ZeroBlockSize);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut block = vec![0u8; self.block_size];
        let mut written = 0;
        while written < self.max_bytes {
            rng.fill_bytes(&mut block);
            out.write_all(&block)?;
            written += block.len();
        }
        out.flush()?;
        Ok(written)
    }

    /// Creates (or truncates) `path` and fills it.
    pub fn write_file(&self, path: &Path) -> Result<usize, FuzzError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)
    }

    /// Fills a new temporary file, deleted when the returned handle drops.
    pub fn write_temp(&self) -> Result<NamedTempFile, FuzzError> {
        let mut file = NamedTempFile::new()?;
        self.write_to(file.as_file_mut())?;
        Ok(file)
    }
}

impl Default for FuzzFile {
    fn default() -> Self {
        Self::new(0)
    }
}
