//! Backing file maps.
//!
//! A backing map is any seekable byte store a region can be read from or
//! written to. Files and in-memory cursors qualify through the blanket impl.

use crate::error::{Error, Operation, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// Seekable, readable, writable byte-addressable resource
pub trait BackingMap: Read + Write + Seek + Send {
    /// Moves the cursor to an absolute offset
    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|e| Error::backing_store(Operation::Seek, offset, e))
    }

    /// Reads exactly `len` bytes at the current cursor
    ///
    /// `offset` is only used to label a failure.
    fn read_len(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)
            .map_err(|e| Error::backing_store(Operation::Read, offset, e))?;
        Ok(buf)
    }

    /// Writes all of `data` at the current cursor
    fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.write_all(data)
            .map_err(|e| Error::backing_store(Operation::Write, offset, e))
    }

    /// Moves the cursor forward without writing
    fn skip(&mut self, offset: u64, len: u64) -> Result<()> {
        let delta = i64::try_from(len).map_err(|_| {
            Error::backing_store(
                Operation::Seek,
                offset,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "skip too large"),
            )
        })?;
        self.seek(SeekFrom::Current(delta))
            .map(|_| ())
            .map_err(|e| Error::backing_store(Operation::Seek, offset, e))
    }
}

impl<T: Read + Write + Seek + Send> BackingMap for T {}

/// Backing map shared between a [`Properties`](crate::Properties) and its users
pub type SharedMap = Arc<Mutex<dyn BackingMap>>;

/// Wraps a backing map for sharing
pub fn shared(map: impl BackingMap + 'static) -> SharedMap {
    Arc::new(Mutex::new(map))
}
