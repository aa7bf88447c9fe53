use std::sync::Arc;

use stash_proxy::DataProxy;
use stash_store::{DataStore, DirectoryError};
use stash_types::Clid;

/// Errors reported by a [`ProxyProvider`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("{0}")]
    Failed(String),
}

impl ProviderError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Supplies proxies for objects the store has not seen yet.
///
/// Every method runs with the store lock held and receives the directory
/// directly. Providers register address-only proxies; the objects are
/// materialized later, outside the lock.
pub trait ProxyProvider: Send + Sync {
    /// Called once when the provider is attached.
    fn preload_proxies(&self, _store: &mut DataStore) -> ProviderResult<()> {
        Ok(())
    }

    /// Called at most once per unit of work to discover candidate objects.
    fn load_proxies(&self, _store: &mut DataStore) -> ProviderResult<()> {
        Ok(())
    }

    /// Called on a lookup miss. A returned proxy that is not yet in the
    /// directory is added under `clid`.
    fn retrieve_proxy(
        &self,
        clid: Clid,
        key: &str,
        store: &mut DataStore,
    ) -> ProviderResult<Option<Arc<DataProxy>>>;
}
