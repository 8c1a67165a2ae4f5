//! Byte addressable persistence seam for the prediction ledger.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

/// Fill value of erased storage, flash convention.
pub const ERASED_BYTE: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("access out of bounds: offset {offset} len {len} in {size} byte region")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("storage region too small: {size} bytes, {required} required")]
    RegionTooSmall { size: usize, required: usize },
}

/// A fixed size byte addressable region. The ledger owns the internal
/// layout; implementations only move bytes. Writes must be durable before
/// returning.
pub trait Storage: Send {
    fn size(&self) -> usize;
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;
    /// Resets a range to [ERASED_BYTE].
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), StorageError>;
}

fn check_bounds(size: usize, offset: usize, len: usize) -> Result<(), StorageError> {
    if offset.checked_add(len).map(|end| end <= size) != Some(true) {
        return Err(StorageError::OutOfBounds { offset, len, size });
    }
    Ok(())
}

/// Volatile [Storage], starts fully erased.
pub struct MemoryStorage {
    bytes: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![ERASED_BYTE; size],
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Storage for MemoryStorage {
    fn size(&self) -> usize {
        self.bytes.len()
    }
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(self.bytes.len(), offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(self.bytes.len(), offset, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), StorageError> {
        check_bounds(self.bytes.len(), offset, len)?;
        self.bytes[offset..offset + len].fill(ERASED_BYTE);
        Ok(())
    }
}

/// File backed [Storage]; every write is synced before returning.
pub struct FileStorage {
    file: File,
    size: usize,
}

impl FileStorage {
    /// Opens (creating and sizing if needed) a regular file as the
    /// persistent region.
    pub fn open<P: AsRef<Path>>(path: P, size: usize) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < size as u64 {
            file.set_len(size as u64)?;
        }
        Ok(Self { file, size })
    }
}

impl Storage for FileStorage {
    fn size(&self) -> usize {
        self.size
    }
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(self.size, offset, buf.len())?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(self.size, offset, data.len())?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(data)?;
        self.file.sync_data()?;
        Ok(())
    }
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), StorageError> {
        check_bounds(self.size, offset, len)?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&vec![ERASED_BYTE; len])?;
        self.file.sync_data()?;
        Ok(())
    }
}
