//! Bidirectional mapping between (name, class id) pairs and hashed keys.
//!
//! Every name recorded in a Stash store is also addressable by a compact
//! [`SgKey`](stash_types::SgKey). The [`StringPool`] hands out those keys
//! and remembers the inverse mapping. Hashing is pluggable through
//! [`KeyHasher`] so that tests can force collisions.
//!
//! A hash collision (two different pairs mapping to the same key) would make
//! lookups silently return the wrong object. It is therefore the one error
//! the pool never returns to its caller: [`StringPool::to_key`] aborts the
//! process. [`StringPool::try_to_key`] exposes the collision as a value for
//! callers that want to inspect it first.

pub mod error;
pub mod hasher;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use hasher::{Blake3KeyHasher, KeyHasher};
pub use pool::{abort_on_collision, PoolEntry, StringPool};
