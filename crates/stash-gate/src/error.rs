use stash_pool::PoolError;
use stash_proxy::{ConvertError, ObjectAddr, ProxyError, ProxyId, ProxyState};
use stash_store::DirectoryError;
use stash_types::{Clid, SlotId, TypeError};

use crate::provider::ProviderError;

/// Errors returned by the store facade.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Nothing is recorded under this class id and key, and no provider
    /// could supply it.
    #[error("no object for clid {clid} key {key:?}")]
    NotFound { clid: Clid, key: String },

    /// The object is not recorded in this store.
    #[error("object {0} is not in the store")]
    UnknownObject(ObjectAddr),

    /// The proxy is not (or no longer) part of this store.
    #[error("{0} is not in the store")]
    UnknownProxy(ProxyId),

    /// The (clid, key) pair is already taken.
    #[error("duplicate key: {key:?} already recorded for clid {clid}")]
    DuplicateKey { clid: Clid, key: String },

    /// The object is already recorded under another key.
    #[error("object {addr} already recorded as {existing_key:?}")]
    DuplicateObject { addr: ObjectAddr, existing_key: String },

    /// The class id already resolves the key to a different proxy.
    #[error("ambiguous ownership: clid {clid} key {key:?} already bound to {existing}")]
    AmbiguousOwnership {
        clid: Clid,
        key: String,
        existing: ProxyId,
    },

    /// The converter failed to build the object.
    #[error("conversion failed for clid {clid} key {key:?}: {source}")]
    ConversionFailure {
        clid: Clid,
        key: String,
        #[source]
        source: ConvertError,
    },

    /// The proxy exists but cannot serve the request in its current state.
    #[error("clid {clid} key {key:?} is {state:?}")]
    InvalidState {
        clid: Clid,
        key: String,
        state: ProxyState,
    },

    /// The object exists but is not of the requested Rust type.
    #[error("clid {clid} key {key:?} is not a {expected}")]
    WrongType {
        clid: Clid,
        key: String,
        expected: &'static str,
    },

    /// A reset token is already bound to another proxy.
    #[error("token {token} is bound to another proxy than {proxy}")]
    HandleBound { token: u64, proxy: ProxyId },

    /// The slot index is not below the number of slots.
    #[error("{slot} out of range for {num_slots} slots")]
    SlotOutOfRange { slot: SlotId, num_slots: usize },

    /// No further version of a versioned key can be allocated.
    #[error("versions of {key:?} for clid {clid} are exhausted")]
    VersionsExhausted { clid: Clid, key: String },

    #[error("provider failure: {0}")]
    ProviderFailure(#[from] ProviderError),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] TypeError),

    /// Key registration conflict in the string pool.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result alias for facade operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<DirectoryError> for StoreError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DuplicateKey { clid, key } => Self::DuplicateKey { clid, key },
            DirectoryError::DuplicateObject { addr, existing_key } => {
                Self::DuplicateObject { addr, existing_key }
            }
            DirectoryError::AmbiguousOwnership {
                clid,
                key,
                existing,
            } => Self::AmbiguousOwnership {
                clid,
                key,
                existing,
            },
            DirectoryError::UnknownProxy(id) => Self::UnknownProxy(id),
        }
    }
}

impl From<ProxyError> for StoreError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::InvalidState { name, clid, state } => Self::InvalidState {
                clid,
                key: name,
                state,
            },
            ProxyError::ConversionFailure { name, clid, source } => Self::ConversionFailure {
                clid,
                key: name,
                source,
            },
            ProxyError::NoConverter { name, clid } => Self::ConversionFailure {
                clid,
                key: name,
                source: ConvertError::new("no converter for address"),
            },
            ProxyError::ObjectAlreadySet { name, clid } => Self::DuplicateKey { clid, key: name },
        }
    }
}

impl StoreError {
    pub(crate) fn not_found(clid: Clid, key: &str) -> Self {
        Self::NotFound {
            clid,
            key: key.to_string(),
        }
    }

    /// `true` for the plain "nothing there" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UnknownObject(_))
    }
}
