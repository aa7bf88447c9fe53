//! Capability traits implemented by [`StoreGate`](crate::StoreGate).
//!
//! Code that only needs part of the facade takes one of these instead of
//! the concrete gate, so tests can substitute a different backing store.

use std::sync::Arc;

use stash_pool::StringPool;
use stash_proxy::DataProxy;
use stash_store::ClearReport;
use stash_types::{Clid, SgKey, SlotId};

use crate::error::StoreResult;
use crate::provider::ProxyProvider;

/// Directory access.
pub trait ProxyDict: Send + Sync {
    /// Lookup by class id and key, consulting the provider on a miss.
    fn proxy(&self, clid: Clid, key: &str) -> StoreResult<Option<Arc<DataProxy>>>;

    fn proxy_exact(&self, sgkey: SgKey) -> StoreResult<Option<Arc<DataProxy>>>;

    fn add_to_store(&self, clid: Clid, proxy: Arc<DataProxy>) -> StoreResult<()>;

    /// Snapshot of every proxy, in insertion order.
    fn proxies(&self) -> StoreResult<Vec<Arc<DataProxy>>>;

    fn string_pool(&self) -> &Arc<StringPool>;
}

/// Provider attachment.
pub trait ProviderAccess: Send + Sync {
    /// Attach a provider and let it preload.
    fn set_provider(&self, provider: Arc<dyn ProxyProvider>) -> StoreResult<()>;

    fn provider(&self) -> Option<Arc<dyn ProxyProvider>>;

    /// Run the provider's discovery for this unit of work. Returns `false`
    /// if it already ran or there is no provider.
    fn load_event_proxies(&self) -> StoreResult<bool>;
}

/// Slot binding and end-of-unit-of-work clearing.
pub trait SlotManagement: Send + Sync {
    fn set_slot_number(&self, slot: SlotId, num_slots: usize) -> StoreResult<()>;

    fn slot(&self) -> SlotId;

    fn num_slots(&self) -> usize;

    fn clear_store(&self, force_remove: bool) -> StoreResult<ClearReport>;
}
