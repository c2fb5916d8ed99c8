//! Regions: contiguous byte ranges of a backing file.
//!
//! A [`Region`] covers `[offset_start, offset_end)` of a file. Its content is
//! absent until loaded or assigned. Regions are composed into trees by
//! [`RegionTree`](crate::RegionTree), which owns the parent/child links
//! stored here.
//!
//! ## Field mutation
//!
//! Offsets and content are changed through explicit setters:
//!
//! - [`Region::set_content`] marks the region modified and recomputes `size`
//!   and `offset_end` from the new content.
//! - [`Region::set_offset_start`] and [`Region::set_offset_end`] mark the
//!   region modified and change nothing else. Keeping
//!   `offset_end == offset_start + size` is then up to the caller.
//! - [`Region::set_size`] changes the span read by the next load without
//!   marking the region modified.

use crate::backing::BackingMap;
use crate::error::{Error, Result};
use crate::properties::Properties;
use crate::registry::Registration;
use crate::tree::RegionId;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

/// End of `[start, start + size)`, or an error if it does not fit in a `u64`
pub(crate) fn end_of(start: u64, size: u64) -> Result<u64> {
    start.checked_add(size).ok_or_else(|| {
        Error::invalid_tree(start, format!("range of {} bytes extends past the end of u64", size))
    })
}

/// How a region emits the spans of its range not covered by a child.
///
/// All kinds share the gap-walking write algorithm; a childless region
/// emits its whole range through the same rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionKind {
    /// Bytes come from the region's own content
    #[default]
    Data,
    /// Every byte is the given value
    Fill(u8),
    /// Nothing is written; the destination keeps whatever it holds
    Preserve,
}

/// One contiguous byte range of a backing file
#[derive(Debug)]
pub struct Region {
    properties: Arc<Properties>,
    offset_start: Option<u64>,
    offset_end: Option<u64>,
    size: u64,
    content: Option<Bytes>,
    modified: bool,
    kind: RegionKind,
    pub(crate) parent: Option<RegionId>,
    pub(crate) children: Vec<RegionId>,
    _registration: Registration,
}

impl Region {
    /// Creates a region, optionally loading its content right away.
    ///
    /// Loading with no resolvable offset or backing map does nothing.
    pub fn new(
        properties: &Arc<Properties>,
        load: bool,
        offset: Option<u64>,
        size: u64,
    ) -> Result<Self> {
        let mut region = Self::unloaded(properties, offset, size)?;
        if load {
            region.load(None, None)?;
        }
        Ok(region)
    }

    /// Creates an unloaded region spanning `[offset, offset + size)`
    pub fn at(properties: &Arc<Properties>, offset: u64, size: u64) -> Result<Self> {
        Self::unloaded(properties, Some(offset), size)
    }

    fn unloaded(properties: &Arc<Properties>, offset: Option<u64>, size: u64) -> Result<Self> {
        let offset_end = offset.map(|start| end_of(start, size)).transpose()?;
        Ok(Self {
            properties: Arc::clone(properties),
            offset_start: offset,
            offset_end,
            size,
            content: None,
            modified: false,
            kind: RegionKind::Data,
            parent: None,
            children: Vec::new(),
            _registration: properties.registry().register(),
        })
    }

    /// Sets the region kind
    pub fn with_kind(mut self, kind: RegionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Properties this region was constructed with
    pub fn properties(&self) -> &Arc<Properties> {
        &self.properties
    }

    /// Absolute offset the region starts at, if known
    pub fn offset_start(&self) -> Option<u64> {
        self.offset_start
    }

    /// Absolute offset one past the region's last byte, if known
    pub fn offset_end(&self) -> Option<u64> {
        self.offset_end
    }

    /// Length of the region in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Loaded or assigned content
    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// True once content or an offset has been assigned after construction
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// How uncovered spans are written
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Region containing this one, if attached
    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    /// Sub-regions in stored order
    pub fn children(&self) -> &[RegionId] {
        &self.children
    }

    /// End of the range the region covers when written
    pub(crate) fn span_end(&self) -> Option<u64> {
        self.offset_end
            .or_else(|| self.offset_start.and_then(|start| start.checked_add(self.size)))
    }

    /// Replaces the content.
    ///
    /// Marks the region modified and resizes it to the new content. Any
    /// `offset_end` cached elsewhere is stale afterwards. If the new end does
    /// not fit in a `u64`, `offset_end` becomes unknown and writing the
    /// region fails.
    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        let content = content.into();
        self.size = content.len() as u64;
        if let Some(start) = self.offset_start {
            self.offset_end = start.checked_add(self.size);
        }
        self.content = Some(content);
        self.modified = true;
    }

    /// Moves the start offset without touching `size` or `offset_end`
    pub fn set_offset_start(&mut self, offset: u64) {
        self.offset_start = Some(offset);
        self.modified = true;
    }

    /// Moves the end offset without touching `size` or `offset_start`
    pub fn set_offset_end(&mut self, offset: u64) {
        self.offset_end = Some(offset);
        self.modified = true;
    }

    /// Changes how many bytes the next load reads
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Changes how uncovered spans are written
    pub fn set_kind(&mut self, kind: RegionKind) {
        self.kind = kind;
    }

    /// Reads the region's content from a backing map.
    ///
    /// The offset defaults to `offset_start` and the map to the properties'
    /// backing map. Without either, or with a zero size, nothing happens.
    /// Loading reflects what is on disk and does not mark the region modified.
    pub fn load(&mut self, offset: Option<u64>, filemap: Option<&mut dyn BackingMap>) -> Result<()> {
        let Some(offset) = offset.or(self.offset_start) else {
            trace!("load skipped: region has no offset");
            return Ok(());
        };

        if self.size == 0 {
            trace!("load skipped: empty region at {}", offset);
            return Ok(());
        }

        if let Some(map) = filemap {
            return self.read_from(offset, map);
        }

        let properties = Arc::clone(&self.properties);
        let Some(shared) = properties.backing_map() else {
            trace!("load skipped: no backing map for region at {}", offset);
            return Ok(());
        };
        let mut map = shared
            .lock()
            .map_err(|_| Error::internal("backing map lock poisoned"))?;
        self.read_from(offset, &mut *map)
    }

    fn read_from(&mut self, offset: u64, map: &mut dyn BackingMap) -> Result<()> {
        let len = usize::try_from(self.size)
            .map_err(|_| Error::invalid_tree(offset, "region too large to load"))?;
        map.seek_to(offset)?;
        let data = map.read_len(offset, len)?;
        debug!("Loaded {} bytes at {}", data.len(), offset);
        self.content = Some(Bytes::from(data));
        Ok(())
    }

    /// Removal hook.
    ///
    /// Removing a region with knock-on effects on its neighbours is decided
    /// by the format layer owning the tree; the base region does nothing.
    pub fn remove(&mut self, impact: bool) {
        trace!(
            "remove requested for region at {:?} (impact: {})",
            self.offset_start,
            impact
        );
    }

    /// Regions this one stands for
    pub fn regions(&self) -> &[Region] {
        std::slice::from_ref(self)
    }

    /// Disposes of the region, releasing its registry slot
    pub fn finalize(self) {
        trace!("finalizing region at {:?}", self.offset_start);
    }
}
