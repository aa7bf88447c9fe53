use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use stash_types::{Clid, SgKey};
use tracing::{error, warn};

use crate::error::{PoolError, PoolResult};
use crate::hasher::{Blake3KeyHasher, KeyHasher};

/// The (name, clid) pair a key stands for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolEntry {
    pub name: String,
    pub clid: Clid,
}

impl PoolEntry {
    fn matches(&self, name: &str, clid: Clid) -> bool {
        self.clid == clid && self.name == name
    }
}

/// Thread-safe string pool.
///
/// All mutations go through one internal mutex, independent of any lock
/// held by the store that owns the pool, so that a lookup which needs a key
/// never re-enters the store lock.
pub struct StringPool {
    hasher: Arc<dyn KeyHasher>,
    entries: Mutex<HashMap<SgKey, PoolEntry>>,
}

impl StringPool {
    /// Create an empty pool using the default BLAKE3 hasher.
    pub fn new() -> Self {
        Self::with_hasher(Arc::new(Blake3KeyHasher::DEFAULT))
    }

    /// Create an empty pool using the given hasher.
    pub fn with_hasher(hasher: Arc<dyn KeyHasher>) -> Self {
        Self {
            hasher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    // The map is append-only, so a guard recovered from a poisoned lock
    // still holds a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<SgKey, PoolEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hash a pair without touching the pool.
    pub fn hash(&self, name: &str, clid: Clid) -> SgKey {
        SgKey::from_hash(self.hasher.hash(name, clid))
    }

    /// Find (or create) the key for a pair, returning collisions as errors.
    pub fn try_to_key(&self, name: &str, clid: Clid) -> PoolResult<SgKey> {
        let key = self.hash(name, clid);
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(existing) if existing.matches(name, clid) => Ok(key),
            Some(existing) => Err(PoolError::HashCollision {
                key,
                existing_name: existing.name.clone(),
                existing_clid: existing.clid,
                name: name.to_string(),
                clid,
            }),
            None => {
                entries.insert(
                    key,
                    PoolEntry {
                        name: name.to_string(),
                        clid,
                    },
                );
                Ok(key)
            }
        }
    }

    /// Find (or create) the key for a pair.
    ///
    /// The same pair always yields the same key. Aborts the process on a
    /// hash collision.
    pub fn to_key(&self, name: &str, clid: Clid) -> SgKey {
        match self.try_to_key(name, clid) {
            Ok(key) => key,
            Err(err) => abort_on_collision(&err),
        }
    }

    /// The pair a key was produced from, if known.
    pub fn key_to_string(&self, key: SgKey) -> Option<PoolEntry> {
        self.lock().get(&key).cloned()
    }

    /// Remember an externally supplied key for a pair.
    ///
    /// Re-registering the same mapping is a no-op. A key that already maps
    /// to a different pair is left untouched and reported.
    pub fn register_key(&self, key: SgKey, name: &str, clid: Clid) -> PoolResult<()> {
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(existing) if existing.matches(name, clid) => Ok(()),
            Some(existing) => {
                warn!(
                    %key,
                    existing = %existing.name,
                    existing_clid = %existing.clid,
                    incoming = name,
                    incoming_clid = %clid,
                    "numeric key maps to multiple name/clid pairs"
                );
                Err(PoolError::KeyConflict {
                    key,
                    existing_name: existing.name.clone(),
                    existing_clid: existing.clid,
                    name: name.to_string(),
                    clid,
                })
            }
            None => {
                entries.insert(
                    key,
                    PoolEntry {
                        name: name.to_string(),
                        clid,
                    },
                );
                Ok(())
            }
        }
    }

    /// Merge another pool into this one.
    ///
    /// Colliding entries are skipped and logged. Returns `true` if there
    /// were no collisions. The other pool is copied out first so that both
    /// locks are never held at once.
    pub fn merge(&self, other: &StringPool) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let incoming = other.entries();
        let mut entries = self.lock();
        let mut clean = true;
        for (key, entry) in incoming {
            match entries.get(&key) {
                Some(existing) if *existing == entry => {}
                Some(existing) => {
                    warn!(
                        %key,
                        existing = %existing.name,
                        incoming = %entry.name,
                        "collision while merging string pools"
                    );
                    clean = false;
                }
                None => {
                    entries.insert(key, entry);
                }
            }
        }
        clean
    }

    /// Snapshot of every mapping, sorted by key.
    pub fn entries(&self) -> Vec<(SgKey, PoolEntry)> {
        let mut all: Vec<(SgKey, PoolEntry)> = self
            .lock()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    /// Number of known keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no key is known.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every mapping.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringPool")
            .field("entries", &self.len())
            .finish()
    }
}

/// Log a hash collision and abort the process.
///
/// Continuing after a collision would let two different pairs resolve to
/// the same proxy without any visible error.
pub fn abort_on_collision(err: &PoolError) -> ! {
    error!(error = %err, "fatal hashed-key collision, aborting");
    eprintln!("stash: fatal: {err}");
    std::process::abort()
}
