//! Error types for the rechunk-core library.
//!
//! Loading and writing regions can fail in two distinct ways: the backing
//! store itself refuses a seek, read or write, or the region tree is shaped
//! in a way that would produce corrupt output. Both are surfaced here.

use std::fmt;
use thiserror::Error;

use crate::tree::RegionId;

/// Result type alias for rechunk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Backing store operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Positioning the cursor
    Seek,
    /// Reading region content
    Read,
    /// Writing region content
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Seek => "seek",
            Operation::Read => "read",
            Operation::Write => "write",
        })
    }
}

/// Error type for all rechunk operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The backing map failed a seek, read or write
    #[error("backing store {operation} failed at offset {offset}: {source}")]
    BackingStore {
        /// Operation that failed
        operation: Operation,
        /// Absolute offset the operation targeted
        offset: u64,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The region tree cannot be serialized without corrupting output
    #[error("invalid region tree at offset {offset}: {details}")]
    InvalidRegionTree {
        /// Offset of the offending region, when known
        offset: u64,
        /// Detailed description of the issue
        details: String,
    },

    /// The id does not name a region of this tree
    #[error("unknown region {id}")]
    UnknownRegion {
        /// The stale or foreign id
        id: RegionId,
    },

    /// A write was requested without a map to write to
    #[error("no backing map available to write region {id}")]
    MissingBackingMap {
        /// Region being written
        id: RegionId,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new backing store error
    pub fn backing_store(operation: Operation, offset: u64, source: std::io::Error) -> Self {
        Self::BackingStore {
            operation,
            offset,
            source,
        }
    }

    /// Creates a new invalid region tree error
    pub fn invalid_tree(offset: u64, details: impl Into<String>) -> Self {
        Self::InvalidRegionTree {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new unknown region error
    pub fn unknown_region(id: RegionId) -> Self {
        Self::UnknownRegion { id }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the failure came from the backing store rather than the tree
    pub fn is_backing_store(&self) -> bool {
        matches!(self, Self::BackingStore { .. })
    }
}
