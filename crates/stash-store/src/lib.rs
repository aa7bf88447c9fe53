//! The proxy directory of a Stash store.
//!
//! [`DataStore`] owns every [`DataProxy`](stash_proxy::DataProxy) of the
//! current unit of work and indexes it four ways:
//!
//! - by class id and name (primary key, aliases, symlinked class ids)
//! - by hashed key ([`SgKey`](stash_types::SgKey))
//! - by the address of the live object (the reverse "t2p" map)
//! - by proxy id (the owning table)
//!
//! # Design Rules
//!
//! 1. At most one proxy per (class id, name) and per live object.
//! 2. Indices hold proxy ids, never extra owners; removing a proxy removes
//!    every index entry that names it.
//! 3. The directory does no locking of its own. The facade serializes all
//!    access behind one mutex and never holds it across materialization.
//! 4. Introspection returns copied-out snapshots.

pub mod directory;
pub mod error;

pub use directory::{ClearReport, DataStore};
pub use error::{DirectoryError, DirectoryResult};
