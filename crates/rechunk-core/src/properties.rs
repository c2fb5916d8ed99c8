//! Format-wide state shared by every region of one file.

use crate::backing::{self, BackingMap, SharedMap};
use crate::registry::LiveRegions;

/// State owned by whatever object represents the file being edited.
///
/// Regions keep a shared handle to it. The core only consults the default
/// backing map and the live-region registry.
#[derive(Default)]
pub struct Properties {
    backing_map: Option<SharedMap>,
    registry: LiveRegions,
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Properties")
            .field("backing_map", &self.backing_map.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Properties {
    /// Creates properties with no backing map and a fresh registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default backing map
    pub fn with_backing_map(mut self, map: impl BackingMap + 'static) -> Self {
        self.backing_map = Some(backing::shared(map));
        self
    }

    /// Sets an already shared backing map
    pub fn with_shared_map(mut self, map: SharedMap) -> Self {
        self.backing_map = Some(map);
        self
    }

    /// Counts regions against an existing registry
    pub fn with_registry(mut self, registry: LiveRegions) -> Self {
        self.registry = registry;
        self
    }

    /// Default backing map used when a load or write is given none
    pub fn backing_map(&self) -> Option<&SharedMap> {
        self.backing_map.as_ref()
    }

    /// Registry regions constructed with these properties count against
    pub fn registry(&self) -> &LiveRegions {
        &self.registry
    }
}
