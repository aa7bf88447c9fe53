use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};

use stash_arena::{Arena, ArenaHeader, ArenaRef, CurrentArenaGuard};
use stash_pool::{PoolEntry, StringPool};
use stash_proxy::{
    object_addr, Address, Converter, DataObject, DataProxy, ObjectAddr, ProxyState, ResetToken,
};
use stash_rcu::{MergeOutcome, RemapTable, Rename, RenameMap};
use stash_store::{ClearReport, DataStore};
use stash_types::{validate_key, validate_record_key, Clid, SgKey, SlotId, VersionedKey, DEFAULT_KEY};
use tracing::{debug, info, warn};

use crate::capability::{ProviderAccess, ProxyDict, SlotManagement};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::provider::ProxyProvider;
use crate::registry::{NoTypes, StoreType, TypeRegistry};

/// Flags for [`StoreGate::record_object`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordOptions {
    /// `false` locks the object against mutation.
    pub allow_mods: bool,
    /// On a non-forced clear, release the payload but keep the proxy.
    pub reset_only: bool,
    /// If the object is already recorded, link it under the new key or
    /// class id instead of failing.
    pub return_existing: bool,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            allow_mods: true,
            reset_only: true,
            return_existing: false,
        }
    }
}

/// The store facade.
///
/// Owns the directory, the string pool, the rename and remap tables, the
/// slot's arena and the provider handle. Directory mutations take a single
/// store-wide lock. Pool and rename lookups never take it, and objects are
/// materialized only after it has been released.
pub struct StoreGate {
    pub(crate) config: StoreConfig,
    pub(crate) store: Mutex<DataStore>,
    pub(crate) pool: Arc<StringPool>,
    renames: RenameMap,
    remaps: RemapTable,
    arenas: Arc<ArenaHeader>,
    arena: RwLock<Arc<Arena>>,
    slot: AtomicUsize,
    num_slots: AtomicUsize,
    provider: RwLock<Option<Arc<dyn ProxyProvider>>>,
    pub(crate) types: Arc<dyn TypeRegistry>,
    store_loaded: AtomicBool,
    new_bound: Mutex<HashMap<ThreadId, Vec<ResetToken>>>,
}

impl StoreGate {
    /// A store with its own string pool and arenas.
    ///
    /// A configured slot outside `num_slots` falls back to the serial slot;
    /// [`StoreConfig::validate`] reports it beforehand.
    pub fn new(config: StoreConfig) -> Self {
        let pool = Arc::new(StringPool::new());
        let arenas = Arc::new(ArenaHeader::new(config.name.clone()));
        let num_slots = config.num_slots.max(1);
        let (slot, arena) = match arenas.bind(SlotId::new(config.slot), num_slots) {
            Some(arena) => (SlotId::new(config.slot), arena),
            None => {
                warn!(store = %config.name, slot = config.slot, num_slots, "configured slot out of range, using the serial slot");
                (SlotId::SERIAL, arenas.serial())
            }
        };
        Self {
            store: Mutex::new(DataStore::new(config.kind, Arc::clone(&pool))),
            pool,
            renames: RenameMap::new(),
            remaps: RemapTable::new(),
            arena: RwLock::new(arena),
            arenas,
            slot: AtomicUsize::new(slot.index()),
            num_slots: AtomicUsize::new(num_slots),
            provider: RwLock::new(None),
            types: Arc::new(NoTypes),
            store_loaded: AtomicBool::new(false),
            new_bound: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Share a string pool with other stores. Use before recording anything.
    pub fn with_pool(mut self, pool: Arc<StringPool>) -> Self {
        self.store = Mutex::new(DataStore::new(self.config.kind, Arc::clone(&pool)));
        self.pool = pool;
        self
    }

    /// Take arenas from a shared slot registry.
    pub fn with_arena_header(mut self, arenas: Arc<ArenaHeader>) -> StoreResult<Self> {
        let (slot, num_slots) = (self.slot(), self.num_slots());
        let arena = arenas
            .bind(slot, num_slots)
            .ok_or(StoreError::SlotOutOfRange { slot, num_slots })?;
        self.arena = RwLock::new(arena);
        self.arenas = arenas;
        Ok(self)
    }

    pub fn with_type_registry(mut self, types: Arc<dyn TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn renames(&self) -> &RenameMap {
        &self.renames
    }

    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, DataStore>> {
        self.store.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Apply the rename table to a requested (clid, key).
    fn resolve(&self, clid: Clid, key: &str) -> (Clid, String) {
        let Some(rename) = self.renames.lookup(self.pool.hash(key, clid)) else {
            return (clid, key.to_string());
        };
        let (new_clid, new_key) = match self.pool.key_to_string(rename.new_key) {
            Some(entry) => (entry.clid, entry.name),
            None => (clid, rename.new_name),
        };
        debug!(%clid, key, %new_clid, new_key = %new_key, "key renamed");
        (new_clid, new_key)
    }

    /// Directory lookup, falling back to the provider on a miss.
    fn find_proxy(
        &self,
        store: &mut DataStore,
        clid: Clid,
        key: &str,
    ) -> StoreResult<Option<Arc<DataProxy>>> {
        if let Some(proxy) = store.proxy(clid, key) {
            return Ok(Some(proxy));
        }
        let Some(provider) = self.provider() else {
            return Ok(None);
        };
        let Some(proxy) = provider.retrieve_proxy(clid, key, store)? else {
            return Ok(None);
        };
        if !store.contains(&proxy) {
            store.add_to_store(clid, Arc::clone(&proxy))?;
        }
        debug!(%clid, key, proxy = %proxy.id(), "proxy supplied by provider");
        Ok(Some(proxy))
    }

    fn locate(store: &DataStore, object: &DataObject) -> StoreResult<Arc<DataProxy>> {
        let addr = object_addr(object);
        store
            .locate_persistent(addr)
            .ok_or(StoreError::UnknownObject(addr))
    }

    fn keyed(store: &DataStore, clid: Clid, key: &str) -> StoreResult<Arc<DataProxy>> {
        store
            .proxy(clid, key)
            .ok_or_else(|| StoreError::not_found(clid, key))
    }

    /// Access the proxy's object outside the store lock.
    fn access(&self, proxy: &Arc<DataProxy>) -> StoreResult<DataObject> {
        let was_live = proxy.is_valid_object();
        let object = proxy.access_object()?;
        if !was_live {
            let mut store = self.lock()?;
            if store.contains(proxy) {
                if let Err(err) = store.t2p_register(object_addr(&object), proxy) {
                    warn!(proxy = %proxy.id(), %err, "materialized object already owned");
                }
            }
        }
        Ok(object)
    }

    fn add_auto_symlinks(&self, store: &mut DataStore, clid: Clid, proxy: &Arc<DataProxy>) {
        if !self.config.auto_symlinks {
            return;
        }
        for base in self.types.bases(clid) {
            if let Err(err) = store.add_symlink(base, proxy) {
                warn!(%clid, %base, key = %proxy.name(), %err, "automatic symlink failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Record `object` under `(clid, key)`.
    ///
    /// An object already owned by a proxy is never recorded twice. With
    /// `return_existing` set, a second record of the same object under the
    /// same class id adds `key` as an alias, and under the same key adds
    /// `clid` as a symlink. Anything else fails and leaves the store as it
    /// was.
    ///
    /// A key of the form `;NN;name` records version `NN` of `name`; see
    /// [`VersionedKey`]. The plain `name` then reaches the new object, and an
    /// earlier object recorded under the plain name stays reachable as
    /// `;00;name`.
    pub fn record_object(
        &self,
        object: DataObject,
        clid: Clid,
        key: &str,
        options: RecordOptions,
    ) -> StoreResult<Arc<DataProxy>> {
        validate_record_key(key)?;
        let mut store = self.lock()?;
        self.record_locked(&mut store, object, clid, key, options)
    }

    fn record_locked(
        &self,
        store: &mut DataStore,
        object: DataObject,
        clid: Clid,
        key: &str,
        options: RecordOptions,
    ) -> StoreResult<Arc<DataProxy>> {
        let addr = object_addr(&object);
        if let Some(existing) = store.locate_persistent(addr) {
            return Self::record_existing(store, existing, addr, clid, key, options);
        }

        let versioned = VersionedKey::parse(key)?;
        let (key, keep) = match &versioned {
            Some(requested) => Self::resolve_version(store, clid, requested)?,
            None => (key.to_string(), None),
        };
        let key = key.as_str();

        let proxy = match store.proxy(clid, key) {
            Some(proxy) => {
                if proxy.is_valid_object() {
                    warn!(%clid, key, "record: key already holds an object");
                    return Err(StoreError::DuplicateKey {
                        clid,
                        key: key.to_string(),
                    });
                }
                proxy.set_object(object)?;
                proxy.set_reset_only(options.reset_only);
                if !options.allow_mods {
                    proxy.set_const();
                }
                proxy
            }
            None => {
                let sgkey = self.pool.to_key(key, clid);
                let proxy = Arc::new(DataProxy::with_object(
                    object,
                    clid,
                    key,
                    sgkey,
                    !options.allow_mods,
                    options.reset_only,
                ));
                store.add_to_store(clid, Arc::clone(&proxy))?;
                proxy
            }
        };
        store.t2p_register(addr, &proxy)?;
        self.add_auto_symlinks(store, clid, &proxy);

        if let Some(requested) = &versioned {
            if let Some((previous, alias)) = keep {
                if let Err(err) = store.add_alias(&alias, &previous) {
                    warn!(%clid, %alias, key = %previous.name(), %err, "could not keep earlier version reachable");
                }
            }
            if let Err(err) = store.take_over_name(requested.base(), &proxy) {
                warn!(%clid, key, base = requested.base(), %err, "plain key not moved to latest version");
            }
        }
        debug!(%clid, key, proxy = %proxy.id(), "object recorded");
        Ok(proxy)
    }

    /// Key to record a versioned request under, plus the proxy recorded
    /// under the plain name (if any) with the versioned alias it keeps.
    fn resolve_version(
        store: &DataStore,
        clid: Clid,
        requested: &VersionedKey,
    ) -> StoreResult<(String, Option<(Arc<DataProxy>, String)>)> {
        let Some(latest) = store.proxy(clid, requested.base()) else {
            let key = if requested.is_auto() {
                VersionedKey::new(requested.base(), 0)?.raw()
            } else {
                requested.raw()
            };
            return Ok((key, None));
        };
        let name = latest.name();
        let latest_version = VersionedKey::of(&name)?;
        let key = if requested.is_auto() {
            latest_version
                .next()
                .ok_or_else(|| StoreError::VersionsExhausted {
                    clid,
                    key: requested.base().to_string(),
                })?
                .raw()
        } else {
            requested.raw()
        };
        let keep = (!VersionedKey::is_versioned(&name)).then(|| (latest, latest_version.raw()));
        Ok((key, keep))
    }

    fn record_existing(
        store: &mut DataStore,
        existing: Arc<DataProxy>,
        addr: ObjectAddr,
        clid: Clid,
        key: &str,
        options: RecordOptions,
    ) -> StoreResult<Arc<DataProxy>> {
        let existing_key = existing.name();
        if !options.return_existing {
            warn!(%clid, key, existing = %existing_key, "record: object already in store");
            return Err(StoreError::DuplicateObject { addr, existing_key });
        }
        if existing.transient_id(clid) {
            if !existing.known_as(key) {
                store.add_alias(key, &existing)?;
            }
            return Ok(existing);
        }
        if existing_key == key {
            store.add_symlink(clid, &existing)?;
            return Ok(existing);
        }
        warn!(%clid, key, existing = %existing_key, "record: object already in store under another key and type");
        Err(StoreError::DuplicateObject { addr, existing_key })
    }

    /// Replace whatever is recorded under `(clid, key)`.
    ///
    /// The previous proxy is destroyed first. The new one is destroyed, not
    /// reset, by the next clear. An object owned by some other proxy is
    /// rejected before anything is removed.
    pub fn overwrite_object(
        &self,
        object: DataObject,
        clid: Clid,
        key: &str,
        allow_mods: bool,
    ) -> StoreResult<Arc<DataProxy>> {
        validate_record_key(key)?;
        let addr = object_addr(&object);
        let mut store = self.lock()?;
        let previous = store.proxy(clid, key);
        if let Some(owner) = store.locate_persistent(addr) {
            if previous.as_ref().map_or(true, |p| p.id() != owner.id()) {
                warn!(%clid, key, existing = %owner.name(), "overwrite: object already in store");
                return Err(StoreError::DuplicateObject {
                    addr,
                    existing_key: owner.name(),
                });
            }
        }
        if let Some(previous) = previous {
            store.remove_proxy(&previous, true, false)?;
            debug!(%clid, key, proxy = %previous.id(), "previous entry removed for overwrite");
        }
        let options = RecordOptions {
            allow_mods,
            reset_only: false,
            return_existing: false,
        };
        self.record_locked(&mut store, object, clid, key, options)
    }

    pub fn overwrite<T: StoreType>(&self, value: T, key: &str) -> StoreResult<Arc<T>> {
        let value = Arc::new(value);
        let object: DataObject = value.clone();
        self.overwrite_object(object, T::CLID, key, true)?;
        Ok(value)
    }

    /// Record a value of a [`StoreType`]. Returns the shared handle.
    pub fn record<T: StoreType>(&self, value: T, key: &str) -> StoreResult<Arc<T>> {
        let value = Arc::new(value);
        self.record_shared(Arc::clone(&value), key, RecordOptions::default())?;
        Ok(value)
    }

    pub fn record_shared<T: StoreType>(
        &self,
        value: Arc<T>,
        key: &str,
        options: RecordOptions,
    ) -> StoreResult<Arc<DataProxy>> {
        let object: DataObject = value;
        self.record_object(object, T::CLID, key, options)
    }

    /// Pre-register an object that a converter will build on first access.
    ///
    /// An existing proxy without an address (or one reset since its last
    /// unit of work) takes the new address.
    pub fn record_address(
        &self,
        address: Address,
        converter: Option<Arc<dyn Converter>>,
        clear_address: bool,
    ) -> StoreResult<Arc<DataProxy>> {
        validate_key(&address.key)?;
        let clid = address.clid;
        let key = address.key.clone();
        let mut store = self.lock()?;

        if let Some(proxy) = store.proxy(clid, &key) {
            if proxy.is_valid_address() && proxy.state() != ProxyState::Reset {
                warn!(%clid, key = %key, "record_address: proxy already has an address");
                return Err(StoreError::DuplicateKey { clid, key });
            }
            proxy.set_address(address)?;
            if let Some(converter) = converter {
                proxy.set_converter(converter);
            }
            return Ok(proxy);
        }

        let sgkey = self.pool.to_key(&key, clid);
        let proxy = Arc::new(DataProxy::with_address(
            address,
            sgkey,
            converter,
            clear_address,
        ));
        store.add_to_store(clid, Arc::clone(&proxy))?;
        self.add_auto_symlinks(&mut store, clid, &proxy);
        debug!(%clid, key = %key, proxy = %proxy.id(), "address recorded");
        Ok(proxy)
    }

    /// Key for a record that does not name one: one past the number of
    /// entries of this type.
    pub fn create_key(&self, clid: Clid) -> StoreResult<String> {
        Ok((self.lock()?.type_count(clid) + 1).to_string())
    }

    /// Lock the object against mutation.
    pub fn set_const(&self, object: &DataObject) -> StoreResult<()> {
        let store = self.lock()?;
        Self::locate(&store, object)?.set_const();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// The object recorded under `(clid, key)`.
    ///
    /// Renames are applied first. On a directory miss the provider is
    /// asked for a proxy. Conversion, if needed, happens without the store
    /// lock.
    pub fn retrieve_object(&self, clid: Clid, key: &str) -> StoreResult<DataObject> {
        let (clid, key) = self.resolve(clid, key);
        self.retrieve_resolved(clid, &key)
    }

    fn retrieve_resolved(&self, clid: Clid, key: &str) -> StoreResult<DataObject> {
        let proxy = {
            let mut store = self.lock()?;
            self.find_proxy(&mut store, clid, key)?
        }
        .ok_or_else(|| StoreError::not_found(clid, key))?;
        self.access(&proxy)
    }

    /// Retrieve and downcast to `T`. Errors name the key after renames.
    pub fn retrieve_as<T: Any + Send + Sync>(&self, clid: Clid, key: &str) -> StoreResult<Arc<T>> {
        let (clid, key) = self.resolve(clid, key);
        self.retrieve_resolved(clid, &key)?
            .downcast::<T>()
            .map_err(|_| StoreError::WrongType {
                clid,
                key,
                expected: type_name::<T>(),
            })
    }

    pub fn retrieve<T: StoreType>(&self, key: &str) -> StoreResult<Arc<T>> {
        self.retrieve_as(T::CLID, key)
    }

    /// Retrieve the only object of type `T`, or the one recorded under
    /// [`DEFAULT_KEY`] when there are several.
    pub fn retrieve_default<T: StoreType>(&self) -> StoreResult<Arc<T>> {
        let proxy = self
            .lock()?
            .proxy_by_type(T::CLID)
            .ok_or_else(|| StoreError::not_found(T::CLID, DEFAULT_KEY))?;
        let key = proxy.name();
        self.access(&proxy)?
            .downcast::<T>()
            .map_err(|_| StoreError::WrongType {
                clid: T::CLID,
                key,
                expected: type_name::<T>(),
            })
    }

    /// `true` if the object is available or can be materialized. May ask the
    /// provider.
    pub fn contains(&self, clid: Clid, key: &str) -> StoreResult<bool> {
        let (clid, key) = self.resolve(clid, key);
        let mut store = self.lock()?;
        Ok(self
            .find_proxy(&mut store, clid, &key)?
            .is_some_and(|proxy| proxy.is_valid()))
    }

    /// `true` if a live object is recorded. Never asks the provider.
    pub fn transient_contains(&self, clid: Clid, key: &str) -> StoreResult<bool> {
        let (clid, key) = self.resolve(clid, key);
        Ok(self
            .lock()?
            .proxy(clid, &key)
            .is_some_and(|proxy| proxy.is_valid_object()))
    }

    /// Hand the object to the caller and release the proxy's payload.
    pub fn retrieve_private_copy(&self, clid: Clid, key: &str) -> StoreResult<DataObject> {
        let (clid, key) = self.resolve(clid, key);
        let proxy = {
            let mut store = self.lock()?;
            self.find_proxy(&mut store, clid, &key)?
        }
        .ok_or_else(|| StoreError::not_found(clid, &key))?;
        if !proxy.is_valid() {
            return Err(StoreError::InvalidState {
                clid,
                key,
                state: proxy.state(),
            });
        }
        let object = proxy.access_object()?;
        let mut store = self.lock()?;
        store.t2p_remove_proxy(&proxy);
        proxy.reset(false);
        Ok(object)
    }

    /// Exchange the objects held under two keys of the same type.
    pub fn transient_swap(&self, clid: Clid, key_a: &str, key_b: &str) -> StoreResult<()> {
        let (clid_a, key_a) = self.resolve(clid, key_a);
        let (clid_b, key_b) = self.resolve(clid, key_b);
        let (a, b) = {
            let store = self.lock()?;
            let a = store
                .proxy_checked(clid_a, &key_a, true)
                .ok_or_else(|| StoreError::not_found(clid_a, &key_a))?;
            let b = store
                .proxy_checked(clid_b, &key_b, true)
                .ok_or_else(|| StoreError::not_found(clid_b, &key_b))?;
            (a, b)
        };
        if a.id() == b.id() {
            return Ok(());
        }
        self.access(&a)?;
        let object_b = self.access(&b)?;

        let mut store = self.lock()?;
        let previous_a = a.swap_object(object_b)?;
        match b.swap_object(Arc::clone(&previous_a)) {
            Ok(previous_b) => {
                store.t2p_remove(object_addr(&previous_a));
                store.t2p_remove(object_addr(&previous_b));
                store.t2p_register(object_addr(&previous_b), &a)?;
                store.t2p_register(object_addr(&previous_a), &b)?;
                debug!(%clid, %key_a, %key_b, "payloads swapped");
                Ok(())
            }
            Err(err) => {
                a.swap_object(previous_a)?;
                Err(err.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Make `(clid, key)` also reachable as `(link, key)`. Idempotent.
    pub fn sym_link(&self, clid: Clid, key: &str, link: Clid) -> StoreResult<()> {
        let (clid, key) = self.resolve(clid, key);
        let mut store = self.lock()?;
        let proxy = Self::keyed(&store, clid, &key)?;
        store.add_symlink(link, &proxy)?;
        Ok(())
    }

    pub fn sym_link_object(&self, object: &DataObject, link: Clid) -> StoreResult<()> {
        let mut store = self.lock()?;
        let proxy = Self::locate(&store, object)?;
        store.add_symlink(link, &proxy)?;
        Ok(())
    }

    /// Make `(clid, key)` also reachable as `(clid, alias)`, for every class
    /// id the proxy is reachable under. Idempotent.
    pub fn set_alias(&self, clid: Clid, key: &str, alias: &str) -> StoreResult<()> {
        validate_key(alias)?;
        let (clid, key) = self.resolve(clid, key);
        let mut store = self.lock()?;
        let proxy = Self::keyed(&store, clid, &key)?;
        store.add_alias(alias, &proxy)?;
        Ok(())
    }

    pub fn set_alias_object(&self, object: &DataObject, alias: &str) -> StoreResult<()> {
        validate_key(alias)?;
        let mut store = self.lock()?;
        let proxy = Self::locate(&store, object)?;
        store.add_alias(alias, &proxy)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove an object. A reset-only proxy keeps its slot.
    pub fn remove(&self, object: &DataObject) -> StoreResult<()> {
        let mut store = self.lock()?;
        let proxy = Self::locate(&store, object)?;
        store.remove_proxy(&proxy, false, false)?;
        Ok(())
    }

    /// Remove an object and its proxy.
    pub fn remove_data_and_proxy(&self, object: &DataObject) -> StoreResult<()> {
        let mut store = self.lock()?;
        let proxy = Self::locate(&store, object)?;
        store.remove_proxy(&proxy, true, false)?;
        Ok(())
    }

    /// Remove a proxy by handle.
    pub fn remove_proxy(&self, proxy: &Arc<DataProxy>, force_remove: bool) -> StoreResult<()> {
        self.lock()?.remove_proxy(proxy, force_remove, false)?;
        Ok(())
    }

    /// Release the object under `(clid, key)` but keep the proxy.
    pub fn release_object(&self, clid: Clid, key: &str) -> StoreResult<Option<DataObject>> {
        let (clid, key) = self.resolve(clid, key);
        let mut store = self.lock()?;
        let proxy = Self::keyed(&store, clid, &key)?;
        store.t2p_remove_proxy(&proxy);
        Ok(proxy.reset(false))
    }

    pub fn clear_proxy_payload(&self, proxy: &Arc<DataProxy>) -> StoreResult<Option<DataObject>> {
        let mut store = self.lock()?;
        if !store.contains(proxy) {
            return Err(StoreError::UnknownProxy(proxy.id()));
        }
        store.t2p_remove_proxy(proxy);
        Ok(proxy.reset(false))
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// First class id (lowest) under which `key` is recorded.
    pub fn clid(&self, key: &str) -> StoreResult<Option<Clid>> {
        Ok(self.lock()?.clids_for_key(key).into_iter().next())
    }

    pub fn clids_for_key(&self, key: &str) -> StoreResult<Vec<Clid>> {
        Ok(self.lock()?.clids_for_key(key))
    }

    pub fn clids(&self) -> StoreResult<Vec<Clid>> {
        Ok(self.lock()?.clids())
    }

    pub fn keys(&self, clid: Clid, include_alias: bool, only_valid: bool) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.keys(clid, include_alias, only_valid))
    }

    pub fn type_count(&self, clid: Clid) -> StoreResult<usize> {
        Ok(self.lock()?.type_count(clid))
    }

    /// Every `(name, proxy)` pair under `clid`, aliases included, sorted by
    /// name.
    pub fn proxy_range(&self, clid: Clid) -> StoreResult<Vec<(String, Arc<DataProxy>)>> {
        Ok(self.lock()?.proxies_of(clid))
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    /// Bind `token` to the proxy under `(clid, key)` and remember it as
    /// newly bound by this thread.
    pub fn bind_handle_to_proxy(
        &self,
        clid: Clid,
        key: &str,
        token: &ResetToken,
    ) -> StoreResult<Arc<DataProxy>> {
        let (clid, key) = self.resolve(clid, key);
        let proxy = {
            let mut store = self.lock()?;
            self.find_proxy(&mut store, clid, &key)?
        }
        .ok_or_else(|| StoreError::not_found(clid, &key))?;

        if !proxy.bind_handle(token) {
            return Err(match token.bound_to() {
                Some(other) if other != proxy.id() => StoreError::HandleBound {
                    token: token.id(),
                    proxy: proxy.id(),
                },
                _ => StoreError::InvalidState {
                    clid,
                    key,
                    state: proxy.state(),
                },
            });
        }
        self.new_bound
            .lock()
            .expect("bound handle lock poisoned")
            .entry(thread::current().id())
            .or_default()
            .push(token.clone());
        Ok(proxy)
    }

    /// Invalidate every token this thread bound since its last commit, so
    /// holders fetch the newly recorded objects. Returns how many.
    pub fn commit_new_data_objects(&self) -> usize {
        let tokens = self
            .new_bound
            .lock()
            .expect("bound handle lock poisoned")
            .remove(&thread::current().id())
            .unwrap_or_default();
        for token in &tokens {
            token.invalidate();
        }
        debug!(store = %self.config.name, count = tokens.len(), "new data objects committed");
        tokens.len()
    }

    // -----------------------------------------------------------------------
    // String pool, renames, remaps
    // -----------------------------------------------------------------------

    pub fn string_to_key(&self, name: &str, clid: Clid) -> SgKey {
        self.pool.to_key(name, clid)
    }

    pub fn key_to_string(&self, key: SgKey) -> Option<PoolEntry> {
        self.pool.key_to_string(key)
    }

    pub fn register_key(&self, key: SgKey, name: &str, clid: Clid) -> StoreResult<()> {
        Ok(self.pool.register_key(key, name, clid)?)
    }

    /// Merge another pool into ours. Returns `false` if any key conflicted.
    pub fn merge_string_pool(&self, other: &StringPool) -> bool {
        self.pool.merge(other)
    }

    /// Publish a rename of `old` to `new` for type `clid`. A name that is
    /// already renamed keeps its first target.
    pub fn add_rename(&self, clid: Clid, old: &str, new: &str) -> MergeOutcome {
        let old_key = self.pool.to_key(old, clid);
        let new_key = self.pool.to_key(new, clid);
        self.renames.merge([(old_key, Rename::new(new_key, new))])
    }

    pub fn merge_renames<I>(&self, delta: I) -> MergeOutcome
    where
        I: IntoIterator<Item = (SgKey, Rename)>,
    {
        self.renames.merge(delta)
    }

    /// Redirect element links into `(clid, source)` to `(clid, target)`
    /// until the next clear.
    pub fn remap(&self, clid: Clid, source: &str, target: &str, index_offset: usize) {
        let source = self.pool.to_key(source, clid);
        let target = self.pool.to_key(target, clid);
        self.remaps.remap(source, target, index_offset);
    }

    pub fn try_remap(&self, key: SgKey, index: usize) -> Option<(SgKey, usize)> {
        self.remaps.try_remap(key, index)
    }

    // -----------------------------------------------------------------------
    // Arena
    // -----------------------------------------------------------------------

    /// The arena of the slot this store is bound to.
    pub fn arena(&self) -> Arc<Arena> {
        Arc::clone(&self.arena.read().expect("arena lock poisoned"))
    }

    /// Make this store's arena the calling thread's current one.
    pub fn make_current(&self) -> CurrentArenaGuard {
        self.arena().make_current()
    }

    /// Allocate in this store's arena. Invalidated by the next clear.
    pub fn alloc<T: Any + Send + Sync>(&self, value: T) -> ArenaRef<T> {
        self.arena().alloc(value)
    }
}

impl ProxyDict for StoreGate {
    fn proxy(&self, clid: Clid, key: &str) -> StoreResult<Option<Arc<DataProxy>>> {
        let (clid, key) = self.resolve(clid, key);
        let mut store = self.lock()?;
        self.find_proxy(&mut store, clid, &key)
    }

    fn proxy_exact(&self, sgkey: SgKey) -> StoreResult<Option<Arc<DataProxy>>> {
        Ok(self.lock()?.proxy_exact(sgkey))
    }

    fn add_to_store(&self, clid: Clid, proxy: Arc<DataProxy>) -> StoreResult<()> {
        self.lock()?.add_to_store(clid, proxy)?;
        Ok(())
    }

    fn proxies(&self) -> StoreResult<Vec<Arc<DataProxy>>> {
        Ok(self.lock()?.proxies())
    }

    fn string_pool(&self) -> &Arc<StringPool> {
        &self.pool
    }
}

impl ProviderAccess for StoreGate {
    fn set_provider(&self, provider: Arc<dyn ProxyProvider>) -> StoreResult<()> {
        *self.provider.write().expect("provider lock poisoned") = Some(Arc::clone(&provider));
        let mut store = self.lock()?;
        provider.preload_proxies(&mut store)?;
        debug!(store = %self.config.name, proxies = store.len(), "provider attached");
        Ok(())
    }

    fn provider(&self) -> Option<Arc<dyn ProxyProvider>> {
        self.provider.read().expect("provider lock poisoned").clone()
    }

    fn load_event_proxies(&self) -> StoreResult<bool> {
        let Some(provider) = self.provider() else {
            return Ok(false);
        };
        if self.store_loaded.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let mut store = self.lock()?;
        if let Err(err) = provider.load_proxies(&mut store) {
            self.store_loaded.store(false, Ordering::Release);
            return Err(err.into());
        }
        Ok(true)
    }
}

impl SlotManagement for StoreGate {
    fn set_slot_number(&self, slot: SlotId, num_slots: usize) -> StoreResult<()> {
        let Some(arena) = self.arenas.bind(slot, num_slots) else {
            warn!(store = %self.config.name, %slot, num_slots, "slot out of range");
            return Err(StoreError::SlotOutOfRange { slot, num_slots });
        };
        self.slot.store(slot.index(), Ordering::Release);
        self.num_slots.store(num_slots, Ordering::Release);
        *self.arena.write().expect("arena lock poisoned") = arena;
        info!(store = %self.config.name, %slot, num_slots, "bound to slot");
        Ok(())
    }

    fn slot(&self) -> SlotId {
        SlotId::new(self.slot.load(Ordering::Acquire))
    }

    fn num_slots(&self) -> usize {
        self.num_slots.load(Ordering::Acquire)
    }

    /// Clear at the end of a unit of work: proxies first, then link remaps,
    /// then the slot's arena.
    fn clear_store(&self, force_remove: bool) -> StoreResult<ClearReport> {
        let hard_reset = self.num_slots() > 1;
        let report = {
            let mut store = self.lock()?;
            if self.config.dump_on_clear {
                info!("{}", self.dump_locked(&store));
            }
            store.clear_store(force_remove, hard_reset)
        };
        self.remaps.clear();
        self.store_loaded.store(false, Ordering::Release);
        self.new_bound
            .lock()
            .expect("bound handle lock poisoned")
            .clear();

        let arena = self.arena();
        arena.reset();
        if self.config.dump_arena {
            info!("{}", arena.report());
        }
        debug!(
            store = %self.config.name,
            force_remove,
            hard_reset,
            reset = report.reset,
            removed = report.removed,
            "store cleared"
        );
        Ok(report)
    }
}

impl fmt::Debug for StoreGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreGate")
            .field("name", &self.config.name)
            .field("kind", &self.config.kind)
            .field("slot", &self.slot())
            .field("num_slots", &self.num_slots())
            .finish_non_exhaustive()
    }
}
