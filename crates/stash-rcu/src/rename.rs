use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use stash_types::SgKey;
use tracing::debug;

/// Replacement for a renamed key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rename {
    pub new_key: SgKey,
    pub new_name: String,
}

impl Rename {
    pub fn new(new_key: SgKey, new_name: impl Into<String>) -> Self {
        Self {
            new_key,
            new_name: new_name.into(),
        }
    }
}

/// One immutable generation of the rename table.
#[derive(Debug, Default)]
pub struct RenameSnapshot {
    generation: u64,
    entries: HashMap<SgKey, Rename>,
}

impl RenameSnapshot {
    /// Publication counter; 0 for the initial empty table.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, key: SgKey) -> Option<&Rename> {
        self.entries.get(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by old key.
    pub fn entries(&self) -> Vec<(SgKey, Rename)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}

/// Result of [`RenameMap::merge`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// New mappings published.
    pub added: usize,
    /// Mappings ignored because the old key was already renamed.
    pub kept: usize,
}

/// RCU-protected map `old key → (new key, new name)`.
///
/// `lookup` is wait-free. `merge` is append-only: a key that is already
/// renamed keeps its first mapping.
pub struct RenameMap {
    snap: ArcSwap<RenameSnapshot>,
}

impl RenameMap {
    pub fn new() -> Self {
        Self {
            snap: ArcSwap::from_pointee(RenameSnapshot::default()),
        }
    }

    /// Resolve `key` against the current snapshot.
    pub fn lookup(&self, key: SgKey) -> Option<Rename> {
        self.snap.load().get(key).cloned()
    }

    /// Pin the current generation.
    ///
    /// The returned snapshot is unaffected by later merges and is freed once
    /// the last holder drops it.
    pub fn snapshot(&self) -> Arc<RenameSnapshot> {
        self.snap.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.snap.load().generation
    }

    pub fn len(&self) -> usize {
        self.snap.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snap.load().is_empty()
    }

    /// Add the mappings from `delta` that are not yet known.
    ///
    /// Builds the next table from the current one and publishes it with a
    /// compare-and-swap, retrying if another writer published first. Nothing
    /// is published when every mapping is already known.
    pub fn merge<I>(&self, delta: I) -> MergeOutcome
    where
        I: IntoIterator<Item = (SgKey, Rename)>,
    {
        let delta: Vec<(SgKey, Rename)> = delta.into_iter().collect();
        loop {
            let cur = self.snap.load_full();
            let mut outcome = MergeOutcome::default();
            let mut entries = cur.entries.clone();
            for (old, rename) in &delta {
                if old.is_null() || entries.contains_key(old) {
                    outcome.kept += 1;
                    continue;
                }
                entries.insert(*old, rename.clone());
                outcome.added += 1;
            }
            if outcome.added == 0 {
                return outcome;
            }

            let next = Arc::new(RenameSnapshot {
                generation: cur.generation + 1,
                entries,
            });
            let generation = next.generation;
            let prev = self.snap.compare_and_swap(&cur, next);
            if Arc::ptr_eq(&prev, &cur) {
                debug!(generation, added = outcome.added, kept = outcome.kept, "renames published");
                return outcome;
            }
        }
    }
}

impl Default for RenameMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenameMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.snap.load();
        f.debug_struct("RenameMap")
            .field("generation", &snap.generation)
            .field("entries", &snap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn key(n: u32) -> SgKey {
        SgKey::from_hash(n)
    }

    #[test]
    fn lookup_after_merge() {
        let map = RenameMap::new();
        assert!(map.lookup(key(1)).is_none());
        let outcome = map.merge([(key(1), Rename::new(key(2), "B"))]);
        assert_eq!(outcome, MergeOutcome { added: 1, kept: 0 });
        assert_eq!(map.lookup(key(1)), Some(Rename::new(key(2), "B")));
        assert_eq!(map.generation(), 1);
    }

    #[test]
    fn merge_never_overwrites() {
        let map = RenameMap::new();
        map.merge([(key(1), Rename::new(key(2), "B"))]);
        let outcome = map.merge([
            (key(1), Rename::new(key(3), "C")),
            (key(4), Rename::new(key(5), "E")),
        ]);
        assert_eq!(outcome, MergeOutcome { added: 1, kept: 1 });
        assert_eq!(map.lookup(key(1)).unwrap().new_name, "B");
        assert_eq!(map.lookup(key(4)).unwrap().new_name, "E");
    }

    #[test]
    fn empty_merge_publishes_nothing() {
        let map = RenameMap::new();
        map.merge([(key(1), Rename::new(key(2), "B"))]);
        let before = map.snapshot();
        map.merge([(key(1), Rename::new(key(9), "Z"))]);
        assert!(Arc::ptr_eq(&before, &map.snapshot()));
    }

    #[test]
    fn pinned_snapshot_is_unaffected_by_later_merge() {
        let map = RenameMap::new();
        let pinned = map.snapshot();
        map.merge([(key(1), Rename::new(key(2), "B"))]);
        assert!(pinned.get(key(1)).is_none());
        assert!(map.lookup(key(1)).is_some());
    }

    #[test]
    fn old_generation_freed_after_last_reader() {
        let map = RenameMap::new();
        let pinned = map.snapshot();
        let weak = Arc::downgrade(&pinned);
        map.merge([(key(1), Rename::new(key(2), "B"))]);
        assert!(weak.upgrade().is_some());
        drop(pinned);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let map = Arc::new(RenameMap::new());
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let map = Arc::clone(&map);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let snap = map.snapshot();
                        // Every published generation is complete.
                        for (old, rename) in snap.entries() {
                            assert_eq!(rename.new_key.get(), old.get() + 1000);
                        }
                    }
                })
            })
            .collect();

        let writers: Vec<_> = (0..4u32)
            .map(|w| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..50u32 {
                        let old = w * 100 + i + 1;
                        map.merge([(key(old), Rename::new(key(old + 1000), format!("k{old}")))]);
                    }
                })
            })
            .collect();

        for w in writers {
            w.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(map.len(), 200);
        assert_eq!(map.generation(), 200);
    }

    proptest! {
        #[test]
        fn merge_keeps_first_mapping(
            pairs in proptest::collection::vec((1u32..64, 1u32..64), 0..40)
        ) {
            let map = RenameMap::new();
            let mut first = HashMap::new();
            for (old, new) in &pairs {
                first.entry(*old).or_insert(*new);
                map.merge([(key(*old), Rename::new(key(*new), new.to_string()))]);
            }
            prop_assert_eq!(map.len(), first.len());
            for (old, new) in first {
                prop_assert_eq!(map.lookup(key(old)).map(|r| r.new_key), Some(key(new)));
            }
        }
    }
}
