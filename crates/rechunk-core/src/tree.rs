//! Region trees and the write-back algorithm.
//!
//! A [`RegionTree`] owns regions and hands out [`RegionId`]s for them. Ids are
//! never reused, so an id that outlives its region is reported as unknown
//! instead of silently naming another region.
//!
//! ## Write algorithm
//!
//! Writing a region seeks to its `offset_start`, then walks its children in
//! stored order:
//!
//! 1. The span between the cursor and the next child's start is emitted by the
//!    region itself (see [`RegionKind`]).
//! 2. The child is written recursively and the cursor advances by the number
//!    of bytes it wrote.
//! 3. After the last child, the span up to the region's end is emitted by the
//!    region itself.
//!
//! A region's `Data` content is indexed by output position, so a parent whose
//! content was loaded over its whole range rewrites every byte no child
//! covers exactly as it was read.
//!
//! Children are never sorted implicitly. [`RegionTree::validate`] rejects
//! trees the algorithm would serialize incorrectly and, unless disabled in
//! [`TreeConfig`], runs before every write.

use crate::backing::BackingMap;
use crate::error::{Error, Result};
use crate::properties::Properties;
use crate::region::{end_of, Region, RegionKind};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest buffer allocated at once when emitting a `Fill` span
const FILL_CHUNK: usize = 8 * 1024;

/// Identity of a region inside one [`RegionTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(usize);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration for a region tree
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Run [`RegionTree::validate`] before every write
    pub validate_before_write: bool,
    /// Deepest nesting accepted below the region being written
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            validate_before_write: true,
            max_depth: 64,
        }
    }
}

impl TreeConfig {
    /// Creates a new tree config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether writes are validated first
    pub fn validate_before_write(mut self, validate: bool) -> Self {
        self.validate_before_write = validate;
        self
    }

    /// Sets the maximum nesting depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Arena of regions linked into parent/child trees
#[derive(Debug)]
pub struct RegionTree {
    properties: Arc<Properties>,
    slots: Vec<Option<Region>>,
    config: TreeConfig,
}

impl RegionTree {
    /// Creates an empty tree with default configuration
    pub fn new(properties: Arc<Properties>) -> Self {
        Self::with_config(properties, TreeConfig::default())
    }

    /// Creates an empty tree with custom configuration
    pub fn with_config(properties: Arc<Properties>, config: TreeConfig) -> Self {
        Self {
            properties,
            slots: Vec::new(),
            config,
        }
    }

    /// Properties shared by the tree's regions
    pub fn properties(&self) -> &Arc<Properties> {
        &self.properties
    }

    /// Active configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Creates an unloaded `Data` region over `[offset, offset + size)` and inserts it
    pub fn create(&mut self, offset: u64, size: u64) -> Result<RegionId> {
        let region = Region::at(&self.properties, offset, size)?;
        Ok(self.insert(region))
    }

    /// Takes ownership of a region and returns its id
    pub fn insert(&mut self, mut region: Region) -> RegionId {
        region.parent = None;
        region.children.clear();
        let id = RegionId(self.slots.len());
        self.slots.push(Some(region));
        trace!("inserted region {}", id);
        id
    }

    /// Region with the given id
    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable region with the given id
    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    fn node(&self, id: RegionId) -> Result<&Region> {
        self.get(id).ok_or_else(|| Error::unknown_region(id))
    }

    fn node_mut(&mut self, id: RegionId) -> Result<&mut Region> {
        self.get_mut(id).ok_or_else(|| Error::unknown_region(id))
    }

    /// Returns true if the id names a region of this tree
    pub fn contains(&self, id: RegionId) -> bool {
        self.get(id).is_some()
    }

    /// Number of regions in the tree
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if the tree holds no regions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all regions, in insertion order
    pub fn ids(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| RegionId(index))
    }

    /// Ids of the regions without a parent
    pub fn roots(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .filter(|region| region.parent.is_none())
                .map(|_| RegionId(index))
        })
    }

    /// Parent of a region
    pub fn parent(&self, id: RegionId) -> Result<Option<RegionId>> {
        Ok(self.node(id)?.parent)
    }

    /// Children of a region in stored order
    pub fn children(&self, id: RegionId) -> Result<&[RegionId]> {
        Ok(&self.node(id)?.children)
    }

    /// Attaches `child` below `parent`.
    ///
    /// Attaching a region that is already a child of `parent` does nothing.
    /// A child attached elsewhere is moved.
    pub fn add_child(&mut self, parent: RegionId, child: RegionId) -> Result<()> {
        self.node(child)?;
        if self.node(parent)?.children.contains(&child) {
            return Ok(());
        }

        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(Error::invalid_tree(
                    self.node(child)?.offset_start().unwrap_or(0),
                    format!("attaching {} below {} would create a cycle", child, parent),
                ));
            }
            ancestor = self.node(current)?.parent;
        }

        self.detach(child)?;
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parent = Some(parent);
        trace!("attached {} below {}", child, parent);
        Ok(())
    }

    /// Detaches a region from its parent, making it a root
    pub fn detach(&mut self, child: RegionId) -> Result<()> {
        let Some(parent) = self.node_mut(child)?.parent.take() else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|&id| id != child);
        trace!("detached {} from {}", child, parent);
        Ok(())
    }

    /// Orders a region's children by start offset.
    ///
    /// Children without a start offset go last. Writes never sort on their own.
    pub fn sort_children(&mut self, id: RegionId) -> Result<()> {
        let mut children = std::mem::take(&mut self.node_mut(id)?.children);
        children.sort_by_key(|&child| {
            let start = self.get(child).and_then(Region::offset_start);
            (start.is_none(), start)
        });
        self.node_mut(id)?.children = children;
        Ok(())
    }

    /// Loads one region, see [`Region::load`]
    pub fn load(
        &mut self,
        id: RegionId,
        offset: Option<u64>,
        filemap: Option<&mut dyn BackingMap>,
    ) -> Result<()> {
        self.node_mut(id)?.load(offset, filemap)
    }

    /// Loads every region of a subtree from the properties' backing map
    pub fn load_subtree(&mut self, id: RegionId) -> Result<()> {
        let ids = self.subtree(id)?;
        for id in &ids {
            self.node_mut(*id)?.load(None, None)?;
        }
        debug!("Loaded subtree of {} ({} regions)", id, ids.len());
        Ok(())
    }

    /// Ids of a region and all its descendants, parents before children
    pub fn subtree(&self, id: RegionId) -> Result<Vec<RegionId>> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let region = self.node(current)?;
            ids.push(current);
            stack.extend(region.children.iter().rev().copied());
        }
        Ok(ids)
    }

    /// Checks that a subtree can be written without corrupting output.
    ///
    /// Every region needs a start offset. Children must have start offsets,
    /// be stored in ascending order without overlapping, and stay inside the
    /// parent's range. `Data` regions must hold content for every span no
    /// child covers, and `Data` leaves must hold content.
    pub fn validate(&self, id: RegionId) -> Result<()> {
        self.extent(id, 0).map(|_| ())
    }

    /// Validates a subtree and returns how many bytes writing it produces
    fn extent(&self, id: RegionId, depth: usize) -> Result<u64> {
        let region = self.node(id)?;
        let start = self.start_of(id, region)?;
        self.check_depth(start, depth)?;

        if region.children.is_empty() {
            end_of(start, region.size())?;
            return match (region.kind(), region.content()) {
                (RegionKind::Data, None) if region.size() > 0 => Err(Error::invalid_tree(
                    start,
                    format!("region {} has no content to write", id),
                )),
                _ => Ok(region.size()),
            };
        }

        let end = self.end_of_span(id, region, start)?;
        if end < start {
            return Err(Error::invalid_tree(
                start,
                format!("region {} ends at {} before it starts", id, end),
            ));
        }

        let mut cursor = start;
        for &child in &region.children {
            let child_start = self.start_of(child, self.node(child)?)?;
            if child_start < cursor {
                let details = if cursor == start {
                    format!("child {} starts before its parent {}", child, id)
                } else {
                    format!("child {} overlaps or precedes its previous sibling", child)
                };
                return Err(Error::invalid_tree(child_start, details));
            }
            self.check_gap(id, region, start, cursor, child_start)?;

            cursor = end_of(child_start, self.extent(child, depth + 1)?)?;
            if cursor > end {
                return Err(Error::invalid_tree(
                    child_start,
                    format!("child {} extends past the end of {} at {}", child, id, end),
                ));
            }
        }
        self.check_gap(id, region, start, cursor, end)?;

        Ok(end - start)
    }

    fn start_of(&self, id: RegionId, region: &Region) -> Result<u64> {
        region.offset_start().ok_or_else(|| {
            let offset = region
                .parent
                .and_then(|parent| self.get(parent))
                .and_then(Region::offset_start)
                .unwrap_or(0);
            Error::invalid_tree(offset, format!("region {} has no start offset", id))
        })
    }

    fn end_of_span(&self, id: RegionId, region: &Region, start: u64) -> Result<u64> {
        region.span_end().ok_or_else(|| {
            Error::invalid_tree(start, format!("region {} extends past the end of u64", id))
        })
    }

    fn check_depth(&self, start: u64, depth: usize) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(Error::invalid_tree(
                start,
                format!("nesting deeper than {} levels", self.config.max_depth),
            ));
        }
        Ok(())
    }

    /// Checks that a `Data` region can emit `[from, to)` from its content
    fn check_gap(&self, id: RegionId, region: &Region, start: u64, from: u64, to: u64) -> Result<()> {
        if from >= to || region.kind() != RegionKind::Data {
            return Ok(());
        }
        let available = region.content().map_or(0, |content| content.len() as u64);
        if to - start > available {
            return Err(Error::invalid_tree(
                from,
                format!(
                    "region {} holds {} bytes but must fill {}..{}",
                    id, available, from, to
                ),
            ));
        }
        Ok(())
    }

    /// Writes a region and its subtree, returning the number of bytes produced
    pub fn write(&self, id: RegionId, filemap: &mut dyn BackingMap) -> Result<u64> {
        if self.config.validate_before_write {
            self.validate(id)?;
        }
        let written = self.write_region(id, filemap, 0)?;
        debug!("Wrote region {} ({} bytes)", id, written);
        Ok(written)
    }

    /// Writes a region and its subtree to the properties' backing map
    pub fn write_back(&self, id: RegionId) -> Result<u64> {
        let shared = self
            .properties
            .backing_map()
            .ok_or(Error::MissingBackingMap { id })?;
        let mut map = shared
            .lock()
            .map_err(|_| Error::internal("backing map lock poisoned"))?;
        self.write(id, &mut *map)
    }

    fn write_region(&self, id: RegionId, map: &mut dyn BackingMap, depth: usize) -> Result<u64> {
        let region = self.node(id)?;
        let start = self.start_of(id, region)?;
        self.check_depth(start, depth)?;

        map.seek_to(start)?;

        if region.children.is_empty() {
            if let (RegionKind::Data, Some(content)) = (region.kind(), region.content()) {
                map.write_bytes(start, content)?;
            } else {
                self.emit(id, region, map, start, start, end_of(start, region.size())?)?;
            }
            return Ok(region.size());
        }

        let mut cursor = start;
        for &child in &region.children {
            let child_start = self.start_of(child, self.node(child)?)?;
            if cursor < child_start {
                self.emit(id, region, map, start, cursor, child_start)?;
                cursor = child_start;
            }
            cursor = end_of(cursor, self.write_region(child, map, depth + 1)?)?;
        }

        let end = self.end_of_span(id, region, start)?;
        if cursor < end {
            self.emit(id, region, map, start, cursor, end)?;
            cursor = end;
        }

        trace!("region {} wrote {}..{}", id, start, cursor);
        Ok(cursor - start)
    }

    /// Emits `[from, to)` of a region that no child covers
    fn emit(
        &self,
        id: RegionId,
        region: &Region,
        map: &mut dyn BackingMap,
        start: u64,
        from: u64,
        to: u64,
    ) -> Result<()> {
        if from >= to {
            return Ok(());
        }
        let len = to - from;
        match region.kind() {
            RegionKind::Data => {
                let slice = region.content().and_then(|content| {
                    let lo = usize::try_from(from - start).ok()?;
                    let hi = usize::try_from(to - start).ok()?;
                    content.get(lo..hi)
                });
                let Some(slice) = slice else {
                    return Err(Error::invalid_tree(
                        from,
                        format!("region {} has no content for {}..{}", id, from, to),
                    ));
                };
                map.write_bytes(from, slice)
            }
            RegionKind::Fill(byte) => {
                let chunk_len = usize::try_from(len).map_or(FILL_CHUNK, |len| len.min(FILL_CHUNK));
                let chunk = vec![byte; chunk_len];
                let mut remaining = len;
                let mut offset = from;
                while remaining > 0 {
                    let n = usize::try_from(remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
                    map.write_bytes(offset, &chunk[..n])?;
                    remaining -= n as u64;
                    offset += n as u64;
                }
                Ok(())
            }
            RegionKind::Preserve => map.skip(from, len),
        }
    }

    /// Disposes of a region and its whole subtree, returning how many regions were disposed
    pub fn dispose(&mut self, id: RegionId) -> Result<usize> {
        let ids = self.subtree(id)?;
        self.detach(id)?;
        for id in &ids {
            if let Some(region) = self.slots.get_mut(id.0).and_then(Option::take) {
                region.finalize();
            }
        }
        debug!("Disposed {} regions below {}", ids.len(), id);
        Ok(ids.len())
    }

    /// Removes a childless region from the tree and hands it back
    pub fn take(&mut self, id: RegionId) -> Result<Region> {
        let region = self.node(id)?;
        if !region.children.is_empty() {
            return Err(Error::invalid_tree(
                region.offset_start().unwrap_or(0),
                format!("region {} still has {} children", id, region.children.len()),
            ));
        }
        self.detach(id)?;
        self.slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| Error::unknown_region(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn tree() -> RegionTree {
        RegionTree::new(Arc::new(Properties::new()))
    }

    fn backed_tree(data: &[u8]) -> RegionTree {
        RegionTree::new(Arc::new(
            Properties::new().with_backing_map(Cursor::new(data.to_vec())),
        ))
    }

    fn data_region(tree: &mut RegionTree, offset: u64, content: &'static [u8]) -> RegionId {
        let id = tree.create(offset, content.len() as u64).unwrap();
        tree.get_mut(id).unwrap().set_content(content);
        id
    }

    fn write_to_vec(tree: &RegionTree, id: RegionId, initial: &[u8]) -> (Vec<u8>, u64) {
        let mut out = Cursor::new(initial.to_vec());
        let written = tree.write(id, &mut out).unwrap();
        (out.into_inner(), written)
    }

    #[test]
    fn test_write_leaf() {
        let mut tree = tree();
        let id = data_region(&mut tree, 10, b"ABCDE");

        let (out, written) = write_to_vec(&tree, id, &[b'.'; 16]);
        assert_eq!(written, 5);
        assert_eq!(&out[..], b"..........ABCDE.");
    }

    #[test]
    fn test_leaf_returns_size() {
        let mut tree = tree();
        let id = data_region(&mut tree, 0, b"ABCDE");
        tree.get_mut(id).unwrap().set_size(3);

        let (out, written) = write_to_vec(&tree, id, &[]);
        assert_eq!(written, 3);
        assert_eq!(&out[..], b"ABCDE");
    }

    #[test]
    fn test_write_failure_is_backing_error() {
        let mut tree = tree();
        let id = data_region(&mut tree, 0, b"ABCDE");
        let mut buf = [0u8; 3];
        let mut out = Cursor::new(&mut buf[..]);

        let err = tree.write(id, &mut out).unwrap_err();
        assert!(err.is_backing_store());
        assert!(matches!(
            err,
            Error::BackingStore {
                operation: crate::error::Operation::Write,
                ..
            }
        ));
    }

    #[test]
    fn test_range_overflow() {
        let mut tree = tree();
        let registry = tree.properties().registry().clone();
        assert!(matches!(
            tree.create(u64::MAX, 2),
            Err(Error::InvalidRegionTree { .. })
        ));
        assert_eq!(registry.count(), 0);

        let id = tree.create(u64::MAX - 1, 0).unwrap();
        tree.get_mut(id).unwrap().set_content(&b"xyz"[..]);
        assert_eq!(tree.get(id).unwrap().offset_end(), None);

        let parent = data_region(&mut tree, u64::MAX - 4, b"0123");
        tree.add_child(parent, id).unwrap();
        assert!(tree.validate(parent).is_err());
        let mut out = Cursor::new(Vec::new());
        assert!(tree.write(parent, &mut out).is_err());
    }

    #[test]
    fn test_write_splices_child() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"0123456789");
        let child = data_region(&mut tree, 4, b"XY");
        tree.add_child(root, child).unwrap();

        let (out, written) = write_to_vec(&tree, root, &[]);
        assert_eq!(written, 10);
        assert_eq!(&out[..], b"0123XY6789");
    }

    #[test]
    fn test_gaps_come_from_parent() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"abcdefghijkl");
        let first = data_region(&mut tree, 2, b"12");
        let second = data_region(&mut tree, 7, b"345");
        tree.add_child(root, first).unwrap();
        tree.add_child(root, second).unwrap();

        let (out, written) = write_to_vec(&tree, root, &[]);
        assert_eq!(written, 12);
        assert_eq!(&out[..], b"ab12efg345kl");
    }

    #[test]
    fn test_nested_write() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"0123456789");
        let middle = data_region(&mut tree, 2, b"abcdef");
        let inner = data_region(&mut tree, 4, b"Z");
        tree.add_child(root, middle).unwrap();
        tree.add_child(middle, inner).unwrap();

        let (out, _) = write_to_vec(&tree, root, &[]);
        assert_eq!(&out[..], b"01abZdef89");
    }

    #[test]
    fn test_round_trip_unmodified() {
        let original = b"HEADER--payload-one--payload-two--TRAILER".to_vec();
        let mut tree = backed_tree(&original);
        let root = tree.create(0, original.len() as u64).unwrap();
        let header = tree.create(0, 6).unwrap();
        let one = tree.create(8, 11).unwrap();
        let two = tree.create(21, 11).unwrap();
        for child in [header, one, two] {
            tree.add_child(root, child).unwrap();
        }
        tree.load_subtree(root).unwrap();
        assert!(tree.ids().all(|id| !tree.get(id).unwrap().is_modified()));

        let (out, written) = write_to_vec(&tree, root, &[]);
        assert_eq!(written, original.len() as u64);
        assert_eq!(out, original);
    }

    #[test]
    fn test_write_back_to_properties_map() {
        let mut tree = backed_tree(b"0000000000");
        let root = tree.create(0, 10).unwrap();
        let child = tree.create(3, 2).unwrap();
        tree.add_child(root, child).unwrap();
        tree.load_subtree(root).unwrap();
        tree.get_mut(child).unwrap().set_content(&b"42"[..]);

        assert_eq!(tree.write_back(root).unwrap(), 10);

        let check = tree.create(0, 10).unwrap();
        tree.load(check, None, None).unwrap();
        assert_eq!(tree.get(check).unwrap().content().unwrap().as_ref(), b"0004200000");
    }

    #[test]
    fn test_write_back_without_map() {
        let mut tree = tree();
        let id = data_region(&mut tree, 0, b"x");
        assert!(matches!(
            tree.write_back(id),
            Err(Error::MissingBackingMap { .. })
        ));
    }

    #[test]
    fn test_add_child_is_idempotent() {
        let mut tree = tree();
        let root = tree.create(0, 10).unwrap();
        let child = tree.create(2, 2).unwrap();

        tree.add_child(root, child).unwrap();
        tree.add_child(root, child).unwrap();

        assert_eq!(tree.children(root).unwrap(), &[child]);
        assert_eq!(tree.parent(child).unwrap(), Some(root));
    }

    #[test]
    fn test_add_child_moves_between_parents() {
        let mut tree = tree();
        let a = tree.create(0, 10).unwrap();
        let b = tree.create(10, 10).unwrap();
        let child = tree.create(12, 2).unwrap();

        tree.add_child(a, child).unwrap();
        tree.add_child(b, child).unwrap();

        assert!(tree.children(a).unwrap().is_empty());
        assert_eq!(tree.children(b).unwrap(), &[child]);
        assert_eq!(tree.parent(child).unwrap(), Some(b));
    }

    #[test]
    fn test_add_child_rejects_cycles() {
        let mut tree = tree();
        let root = tree.create(0, 10).unwrap();
        let child = tree.create(2, 4).unwrap();
        tree.add_child(root, child).unwrap();

        assert!(tree.add_child(child, root).is_err());
        assert!(tree.add_child(root, root).is_err());
        assert_eq!(tree.parent(root).unwrap(), None);
    }

    #[test]
    fn test_detach_and_roots() {
        let mut tree = tree();
        let root = tree.create(0, 10).unwrap();
        let child = tree.create(2, 4).unwrap();
        tree.add_child(root, child).unwrap();
        assert_eq!(tree.roots().collect::<Vec<_>>(), vec![root]);

        tree.detach(child).unwrap();
        assert_eq!(tree.roots().collect::<Vec<_>>(), vec![root, child]);
        assert!(tree.children(root).unwrap().is_empty());
    }

    #[test]
    fn test_sort_children() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"0123456789");
        let late = data_region(&mut tree, 6, b"L");
        let early = data_region(&mut tree, 1, b"E");
        tree.add_child(root, late).unwrap();
        tree.add_child(root, early).unwrap();

        assert!(tree.validate(root).is_err());
        tree.sort_children(root).unwrap();
        assert_eq!(tree.children(root).unwrap(), &[early, late]);

        let (out, _) = write_to_vec(&tree, root, &[]);
        assert_eq!(&out[..], b"0E2345L789");
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"0123456789");
        let a = data_region(&mut tree, 2, b"aaa");
        let b = data_region(&mut tree, 4, b"bb");
        tree.add_child(root, a).unwrap();
        tree.add_child(root, b).unwrap();

        let err = tree.validate(root).unwrap_err();
        assert!(matches!(err, Error::InvalidRegionTree { offset: 4, .. }));
        let mut out = Cursor::new(Vec::new());
        assert!(tree.write(root, &mut out).is_err());
        assert!(out.into_inner().is_empty());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let mut tree = tree();
        let root = data_region(&mut tree, 10, b"0123");
        let before = data_region(&mut tree, 8, b"x");
        tree.add_child(root, before).unwrap();
        assert!(tree.validate(root).is_err());

        tree.detach(before).unwrap();
        let past = data_region(&mut tree, 12, b"xyz");
        tree.add_child(root, past).unwrap();
        assert!(tree.validate(root).is_err());
    }

    #[test]
    fn test_validate_rejects_short_parent_content() {
        let mut tree = tree();
        let root = tree.create(0, 10).unwrap();
        let child = data_region(&mut tree, 4, b"XY");
        tree.add_child(root, child).unwrap();
        assert!(tree.validate(root).is_err());

        tree.get_mut(root).unwrap().set_content(&b"0123"[..]);
        tree.get_mut(root).unwrap().set_offset_end(10);
        assert!(tree.validate(root).is_err());
    }

    #[test]
    fn test_validate_accepts_tiling_children_without_content() {
        let mut tree = tree();
        let root = tree.create(0, 4).unwrap();
        let a = data_region(&mut tree, 0, b"ab");
        let b = data_region(&mut tree, 2, b"cd");
        tree.add_child(root, a).unwrap();
        tree.add_child(root, b).unwrap();

        let (out, written) = write_to_vec(&tree, root, &[]);
        assert_eq!(written, 4);
        assert_eq!(&out[..], b"abcd");
    }

    #[test]
    fn test_validate_rejects_missing_offset() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"0123");
        let region = Region::new(tree.properties(), false, None, 1).unwrap();
        let child = tree.insert(region);
        tree.add_child(root, child).unwrap();
        assert!(tree.validate(root).is_err());
    }

    #[test]
    fn test_validate_rejects_leaf_without_content() {
        let mut tree = tree();
        let id = tree.create(0, 4).unwrap();
        assert!(tree.validate(id).is_err());

        let empty = tree.create(4, 0).unwrap();
        assert!(tree.validate(empty).is_ok());
    }

    #[test]
    fn test_max_depth() {
        let props = Arc::new(Properties::new());
        let mut tree = RegionTree::with_config(props, TreeConfig::new().max_depth(1));
        let a = data_region(&mut tree, 0, b"0123");
        let b = data_region(&mut tree, 1, b"12");
        let c = data_region(&mut tree, 1, b"1");
        tree.add_child(a, b).unwrap();
        assert!(tree.validate(a).is_ok());
        tree.add_child(b, c).unwrap();
        assert!(tree.validate(a).is_err());
    }

    #[test]
    fn test_unvalidated_write_still_fails_on_missing_bytes() {
        let props = Arc::new(Properties::new());
        let config = TreeConfig::new().validate_before_write(false);
        let mut tree = RegionTree::with_config(props, config);
        let root = tree.create(0, 10).unwrap();
        let child = data_region(&mut tree, 4, b"XY");
        tree.add_child(root, child).unwrap();

        let mut out = Cursor::new(Vec::new());
        assert!(tree.write(root, &mut out).is_err());
    }

    #[test]
    fn test_modified_child_grows() {
        let mut tree = tree();
        let root = data_region(&mut tree, 0, b"0123456789");
        let child = data_region(&mut tree, 4, b"XY");
        tree.add_child(root, child).unwrap();
        tree.get_mut(child).unwrap().set_content(&b"XYZ"[..]);

        let (out, written) = write_to_vec(&tree, root, &[]);
        assert_eq!(written, 10);
        assert_eq!(&out[..], b"0123XYZ789");
    }

    #[test]
    fn test_fill_kind() {
        let mut tree = tree();
        let root = tree.insert(Region::at(tree.properties(), 0, 8).unwrap().with_kind(RegionKind::Fill(0)));
        let child = data_region(&mut tree, 3, b"AB");
        tree.add_child(root, child).unwrap();

        let (out, written) = write_to_vec(&tree, root, &[]);
        assert_eq!(written, 8);
        assert_eq!(out, vec![0, 0, 0, b'A', b'B', 0, 0, 0]);
    }

    #[test]
    fn test_preserve_kind() {
        let mut tree = tree();
        let root = tree.insert(Region::at(tree.properties(), 0, 8).unwrap().with_kind(RegionKind::Preserve));
        let child = data_region(&mut tree, 2, b"ab");
        tree.add_child(root, child).unwrap();

        let (out, written) = write_to_vec(&tree, root, b"01234567");
        assert_eq!(written, 8);
        assert_eq!(&out[..], b"01ab4567");
    }

    #[test]
    fn test_dispose_counts() {
        let mut tree = tree();
        let registry = tree.properties().registry().clone();
        let root = tree.create(0, 10).unwrap();
        let a = tree.create(0, 2).unwrap();
        let b = tree.create(4, 2).unwrap();
        let other = tree.create(20, 1).unwrap();
        tree.add_child(root, a).unwrap();
        tree.add_child(root, b).unwrap();
        assert_eq!(registry.count(), 4);

        assert_eq!(tree.dispose(b).unwrap(), 1);
        assert_eq!(registry.count(), 3);
        assert_eq!(tree.children(root).unwrap(), &[a]);

        assert_eq!(tree.dispose(root).unwrap(), 2);
        assert_eq!(registry.count(), 1);
        assert!(matches!(tree.dispose(root), Err(Error::UnknownRegion { .. })));
        assert_eq!(registry.count(), 1);
        assert_eq!(tree.len(), 1);
        assert!(tree.contains(other));

        drop(tree);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_take() {
        let mut tree = tree();
        let registry = tree.properties().registry().clone();
        let root = tree.create(0, 10).unwrap();
        let child = tree.create(2, 2).unwrap();
        tree.add_child(root, child).unwrap();

        assert!(tree.take(root).is_err());
        let region = tree.take(child).unwrap();
        assert!(region.parent().is_none());
        assert!(tree.children(root).unwrap().is_empty());
        assert!(!tree.contains(child));
        assert_eq!(registry.count(), 2);

        region.finalize();
        assert_eq!(registry.count(), 1);
    }
}
