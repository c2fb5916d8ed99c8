//! # rechunk-core
//!
//! A library for editing binary files as trees of byte-range regions.
//!
//! This crate provides the core functionality for:
//! - Describing a file as nested regions (`[offset_start, offset_end)` ranges)
//! - Lazily loading region content from a backing file
//! - Writing a region tree back, splicing modified regions into the
//!   untouched bytes around them
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`region`]: Single regions, their offsets, content and kind
//! - [`tree`]: Region trees, validation and the write-back algorithm
//! - [`registry`]: Live-region accounting
//! - [`properties`]: File-wide state shared by regions
//! - [`backing`]: The seekable byte stores regions live in
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use rechunk_core::{Properties, RegionTree};
//! use std::io::Cursor;
//! use std::sync::Arc;
//!
//! let file = Cursor::new(b"0123456789".to_vec());
//! let properties = Arc::new(Properties::new().with_backing_map(file));
//! let mut tree = RegionTree::new(properties);
//!
//! let root = tree.create(0, 10)?;
//! let field = tree.create(4, 2)?;
//! tree.add_child(root, field)?;
//! tree.load_subtree(root)?;
//!
//! tree.get_mut(field).unwrap().set_content(&b"XY"[..]);
//!
//! let mut out = Cursor::new(Vec::new());
//! assert_eq!(tree.write(root, &mut out)?, 10);
//! assert_eq!(out.into_inner(), b"0123XY6789");
//! # Ok::<(), rechunk_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod backing;
pub mod error;
pub mod properties;
pub mod region;
pub mod registry;
pub mod tree;

// Re-export primary types for convenience
pub use backing::{BackingMap, SharedMap};
pub use error::{Error, Operation, Result};
pub use properties::Properties;
pub use region::{Region, RegionKind};
pub use registry::{LiveRegions, Registration};
pub use tree::{RegionId, RegionTree, TreeConfig};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
