//! Key renaming for the Stash transient object store.
//!
//! [`RenameMap`] maps an old hashed key to its replacement. Readers load the
//! current snapshot without locking; writers build a fresh table from the
//! current one and publish it with a single atomic swap. A snapshot stays
//! alive for as long as any reader holds it.
//!
//! [`RemapTable`] is the per-unit-of-work table used to redirect element
//! links from one container to another. It is cleared with the store.

pub mod remap;
pub mod rename;

pub use remap::{RemapEntry, RemapTable};
pub use rename::{MergeOutcome, Rename, RenameMap, RenameSnapshot};
