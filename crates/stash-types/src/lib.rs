//! Foundation types for the Stash transient object store.
//!
//! This crate provides the identifier types shared by every other Stash
//! crate. Every other Stash crate depends on `stash-types`.
//!
//! # Key Types
//!
//! - [`Clid`] — Process-wide identifier for a logical data type
//! - [`SgKey`] — Fixed-width hashed key derived from a (name, [`Clid`]) pair
//! - [`StoreKind`] — Which kind of store (event, detector, conditions, ...)
//! - [`SlotId`] — Execution slot of a store running in parallel mode
//! - [`VersionedKey`] — Key name with a version, spelled `;NN;name`
//!
//! Key names are validated by [`validate_key`].

pub mod clid;
pub mod error;
pub mod key;
pub mod names;
pub mod slot;
pub mod version;

pub use clid::{Clid, StoreKind};
pub use error::TypeError;
pub use key::SgKey;
pub use names::{validate_key, DEFAULT_KEY};
pub use slot::SlotId;
pub use version::{validate_record_key, VersionedKey};
