use std::sync::{Arc, RwLock};

use stash_types::SlotId;
use tracing::debug;

use crate::arena::{Arena, ArenaReport};

/// Registry of arenas, one per execution slot.
#[derive(Debug)]
pub struct ArenaHeader {
    prefix: String,
    arenas: RwLock<Vec<Arc<Arena>>>,
}

impl ArenaHeader {
    /// Arenas are named `<prefix>_<slot index>`. The serial slot's arena
    /// exists from the start.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let serial = Arc::new(Arena::new(Self::arena_name(&prefix, SlotId::SERIAL), SlotId::SERIAL));
        Self {
            prefix,
            arenas: RwLock::new(vec![serial]),
        }
    }

    fn arena_name(prefix: &str, slot: SlotId) -> String {
        format!("{prefix}_{}", slot.index())
    }

    /// The serial slot's arena.
    pub fn serial(&self) -> Arc<Arena> {
        Arc::clone(&self.arenas.read().expect("arena header lock poisoned")[0])
    }

    /// The arena for `slot`, if that slot has been bound.
    pub fn arena_for(&self, slot: SlotId) -> Option<Arc<Arena>> {
        self.arenas
            .read()
            .expect("arena header lock poisoned")
            .get(slot.index())
            .cloned()
    }

    /// The arena for `slot` out of `num_slots`, creating arenas for every
    /// slot up to `num_slots` as needed. `None` if `slot` is out of range.
    pub fn bind(&self, slot: SlotId, num_slots: usize) -> Option<Arc<Arena>> {
        if slot.index() >= num_slots {
            return None;
        }
        if let Some(arena) = self.arena_for(slot) {
            return Some(arena);
        }
        let mut arenas = self.arenas.write().expect("arena header lock poisoned");
        while arenas.len() < num_slots {
            let next = SlotId::new(arenas.len());
            let name = Self::arena_name(&self.prefix, next);
            debug!(arena = %name, slot = %next, "arena created");
            arenas.push(Arc::new(Arena::new(name, next)));
        }
        Some(Arc::clone(&arenas[slot.index()]))
    }

    pub fn len(&self) -> usize {
        self.arenas.read().expect("arena header lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports for every arena, by slot.
    pub fn report(&self) -> Vec<ArenaReport> {
        self.arenas
            .read()
            .expect("arena header lock poisoned")
            .iter()
            .map(|arena| arena.report())
            .collect()
    }
}
