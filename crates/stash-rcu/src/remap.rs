use std::collections::HashMap;
use std::sync::Mutex;

use stash_types::SgKey;
use tracing::debug;

/// Target of an element-link remap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemapEntry {
    pub target: SgKey,
    /// Added to the element index when following the link.
    pub index_offset: usize,
}

/// Redirects element links from one container to another for the current
/// unit of work.
///
/// Written rarely and cleared with the store, so a plain lock suffices.
#[derive(Debug, Default)]
pub struct RemapTable {
    entries: Mutex<HashMap<SgKey, RemapEntry>>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send links pointing into `source` to `target`, shifting element
    /// indices by `index_offset`. A later remap of the same source replaces
    /// the earlier one.
    pub fn remap(&self, source: SgKey, target: SgKey, index_offset: usize) {
        let entry = RemapEntry {
            target,
            index_offset,
        };
        self.entries
            .lock()
            .expect("remap lock poisoned")
            .insert(source, entry);
        debug!(source = %source, target = %target, index_offset, "link remap added");
    }

    /// Follow a remap for `(key, index)`, if one exists.
    pub fn try_remap(&self, key: SgKey, index: usize) -> Option<(SgKey, usize)> {
        let entries = self.entries.lock().expect("remap lock poisoned");
        let entry = entries.get(&key)?;
        Some((entry.target, index + entry.index_offset))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("remap lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("remap lock poisoned").clear();
    }
}
