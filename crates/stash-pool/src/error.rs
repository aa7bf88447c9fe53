use stash_types::{Clid, SgKey};

/// Errors from string pool operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// Two distinct (name, clid) pairs hash to the same key.
    #[error("hash collision on key {key}: {existing_name:?}/{existing_clid} and {name:?}/{clid}")]
    HashCollision {
        key: SgKey,
        existing_name: String,
        existing_clid: Clid,
        name: String,
        clid: Clid,
    },

    /// An externally supplied key already maps to a different pair.
    #[error("key {key} already maps to {existing_name:?}/{existing_clid}, cannot register {name:?}/{clid}")]
    KeyConflict {
        key: SgKey,
        existing_name: String,
        existing_clid: Clid,
        name: String,
        clid: Clid,
    },
}

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
