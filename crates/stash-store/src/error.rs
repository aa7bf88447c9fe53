use stash_proxy::{ObjectAddr, ProxyId};
use stash_types::Clid;

/// Errors from directory operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The (clid, key) pair is already taken by another proxy.
    #[error("duplicate key: {key:?} already recorded for clid {clid}")]
    DuplicateKey { clid: Clid, key: String },

    /// The object is already owned by another proxy.
    #[error("object {addr} already recorded as {existing_key:?}")]
    DuplicateObject { addr: ObjectAddr, existing_key: String },

    /// The class id already resolves this name to a different proxy.
    #[error("ambiguous ownership: clid {clid} key {key:?} already bound to {existing}")]
    AmbiguousOwnership {
        clid: Clid,
        key: String,
        existing: ProxyId,
    },

    /// The proxy is not (or no longer) part of this directory.
    #[error("{0} is not in the store")]
    UnknownProxy(ProxyId),
}

/// Result alias for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
