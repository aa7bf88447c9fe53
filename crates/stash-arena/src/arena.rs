use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use stash_types::SlotId;
use tracing::{debug, warn};

type Cell = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Blocks {
    cells: Vec<Option<Cell>>,
    /// Number of occupied cells since the last reset.
    used: usize,
    allocations: u64,
    peak: usize,
}

/// Bulk allocator for one execution slot.
pub struct Arena {
    name: String,
    slot: SlotId,
    generation: AtomicU64,
    resets: AtomicU64,
    blocks: Mutex<Blocks>,
}

/// Usage counters, as printed by the store dump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaReport {
    pub name: String,
    pub slot: SlotId,
    pub generation: u64,
    pub live: usize,
    pub capacity: usize,
    pub peak: usize,
    pub allocations: u64,
    pub resets: u64,
}

impl fmt::Display for ArenaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arena {} ({}) gen={} live={} capacity={} peak={} allocations={} resets={}",
            self.name,
            self.slot,
            self.generation,
            self.live,
            self.capacity,
            self.peak,
            self.allocations,
            self.resets
        )
    }
}

impl Arena {
    pub fn new(name: impl Into<String>, slot: SlotId) -> Self {
        Self {
            name: name.into(),
            slot,
            generation: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            blocks: Mutex::new(Blocks::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Incremented by every reset.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Blocks> {
        self.blocks.lock().expect("arena lock poisoned")
    }

    /// Place `value` in the arena.
    pub fn alloc<T: Any + Send + Sync>(self: &Arc<Self>, value: T) -> ArenaRef<T> {
        let mut blocks = self.lock();
        // Read under the lock so a concurrent reset cannot slip in between.
        let generation = self.generation();
        let index = blocks.used;
        if index == blocks.cells.len() {
            blocks.cells.push(None);
        }
        blocks.cells[index] = Some(Arc::new(value));
        blocks.used += 1;
        blocks.allocations += 1;
        blocks.peak = blocks.peak.max(blocks.used);
        ArenaRef {
            arena: Arc::clone(self),
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Invalidate every allocation made since the last reset.
    ///
    /// Cells are emptied but the storage is kept. Returns the number of
    /// allocations released.
    pub fn reset(&self) -> usize {
        let mut blocks = self.lock();
        let used = blocks.used;
        let mut outstanding = 0;
        for cell in blocks.cells.iter_mut().take(used) {
            if let Some(value) = cell.take() {
                if Arc::strong_count(&value) > 1 {
                    outstanding += 1;
                }
            }
        }
        blocks.used = 0;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.resets.fetch_add(1, Ordering::Relaxed);
        drop(blocks);

        if outstanding > 0 {
            warn!(arena = %self.name, slot = %self.slot, outstanding, "arena reset while objects are still referenced");
        }
        debug!(arena = %self.name, slot = %self.slot, released = used, generation, "arena reset");
        used
    }

    /// Allocations made since the last reset.
    pub fn live(&self) -> usize {
        self.lock().used
    }

    pub fn report(&self) -> ArenaReport {
        let blocks = self.lock();
        ArenaReport {
            name: self.name.clone(),
            slot: self.slot,
            generation: self.generation(),
            live: blocks.used,
            capacity: blocks.cells.capacity(),
            peak: blocks.peak,
            allocations: blocks.allocations,
            resets: self.resets.load(Ordering::Relaxed),
        }
    }

    /// Make this the calling thread's current arena until the guard drops.
    pub fn make_current(self: &Arc<Self>) -> CurrentArenaGuard {
        let previous = CURRENT.with(|current| current.replace(Some(Arc::clone(self))));
        CurrentArenaGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("name", &self.name)
            .field("slot", &self.slot)
            .field("generation", &self.generation())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Generation-checked reference to an arena allocation.
pub struct ArenaRef<T> {
    arena: Arc<Arena>,
    index: usize,
    generation: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ArenaRef<T> {
    /// The allocation, or `None` once the arena has been reset.
    pub fn get(&self) -> Option<Arc<T>> {
        let blocks = self.arena.lock();
        if self.arena.generation() != self.generation {
            return None;
        }
        let cell = blocks.cells.get(self.index)?.clone()?;
        cell.downcast::<T>().ok()
    }

    pub fn is_live(&self) -> bool {
        self.arena.generation() == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Clone for ArenaRef<T> {
    fn clone(&self) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
            index: self.index,
            generation: self.generation,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ArenaRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaRef")
            .field("arena", &self.arena.name)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Thread-scoped current arena
// ---------------------------------------------------------------------------

thread_local! {
    static CURRENT: RefCell<Option<Arc<Arena>>> = const { RefCell::new(None) };
}

/// Restores the previously current arena when dropped.
#[must_use = "the arena stops being current when the guard is dropped"]
pub struct CurrentArenaGuard {
    previous: Option<Arc<Arena>>,
    // Must be dropped on the thread that created it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentArenaGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| {
            current.replace(previous);
        });
    }
}

/// The calling thread's current arena, if any.
pub fn current_arena() -> Option<Arc<Arena>> {
    CURRENT.with(|current| current.borrow().clone())
}
