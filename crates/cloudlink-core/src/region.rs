//! Persistent byte region abstraction.
//!
//! The region is the raw storage primitive behind the credential store:
//! - ESP32: an NVS blob with an EEPROM-style RAM cache
//! - Linux: a 512-byte file
//! - Tests: [`MemoryRegion`]
//!
//! Writes land in a staging buffer and only become durable on `commit`.

use thiserror::Error;

/// Errors raised by the storage primitive.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Access outside the reserved block.
    #[error("range {offset}..{end} outside region of {size} bytes")]
    OutOfBounds {
        offset: usize,
        end: usize,
        size: usize,
    },

    /// Reading the backing store failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Staging a write failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Making staged writes durable failed.
    #[error("commit failed: {0}")]
    Commit(String),
}

/// A fixed-size persistent byte block.
pub trait ByteRegion {
    /// Size of the block in bytes.
    fn size(&self) -> usize;

    /// Fill `buf` from `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Stage `data` at `offset`. Not durable until [`ByteRegion::commit`].
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Make all staged writes durable.
    fn commit(&mut self) -> Result<(), StorageError>;
}

impl<R: ByteRegion + ?Sized> ByteRegion for Box<R> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(offset, data)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        (**self).commit()
    }
}

/// Check that `offset..offset + len` lies within a region of `size` bytes.
pub fn check_bounds(offset: usize, len: usize, size: usize) -> Result<(), StorageError> {
    let end = offset.saturating_add(len);
    if end > size {
        return Err(StorageError::OutOfBounds { offset, end, size });
    }
    Ok(())
}

/// RAM-backed region.
///
/// Keeps staged and committed contents apart so tests can observe exactly
/// what would survive a reset.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    staged: Vec<u8>,
    committed: Vec<u8>,
    commits: usize,
}

impl MemoryRegion {
    /// A zero-filled region of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            staged: vec![0; size],
            committed: vec![0; size],
            commits: 0,
        }
    }

    /// A region whose committed contents are `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            staged: bytes.to_vec(),
            committed: bytes.to_vec(),
            commits: 0,
        }
    }

    /// Contents as they would be after a reset.
    pub fn committed(&self) -> &[u8] {
        &self.committed
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl ByteRegion for MemoryRegion {
    fn size(&self) -> usize {
        self.staged.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.staged.len())?;
        buf.copy_from_slice(&self.staged[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.staged.len())?;
        self.staged[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.committed.copy_from_slice(&self.staged);
        self.commits += 1;
        Ok(())
    }
}
