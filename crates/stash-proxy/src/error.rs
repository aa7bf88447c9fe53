use stash_types::Clid;

use crate::proxy::ProxyState;

/// Error reported by a [`Converter`](crate::Converter).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ConvertError(pub String);

impl ConvertError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors from proxy operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProxyError {
    /// The operation is not allowed in the proxy's current state.
    #[error("proxy {name:?} (clid {clid}) is {state:?}")]
    InvalidState {
        name: String,
        clid: Clid,
        state: ProxyState,
    },

    /// The converter could not build the object from its address.
    #[error("conversion failed for {name:?} (clid {clid}): {source}")]
    ConversionFailure {
        name: String,
        clid: Clid,
        #[source]
        source: ConvertError,
    },

    /// The proxy holds an address but nothing can materialize it.
    #[error("proxy {name:?} (clid {clid}) has an address but no converter")]
    NoConverter { name: String, clid: Clid },

    /// A different object is already attached.
    #[error("proxy {name:?} (clid {clid}) already holds a different object")]
    ObjectAlreadySet { name: String, clid: Clid },
}

/// Result alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
