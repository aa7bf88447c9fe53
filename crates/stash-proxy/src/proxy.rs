use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stash_types::{Clid, SgKey};
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::handle::ResetToken;
use crate::object::{Address, Converter, DataObject};

static NEXT_PROXY: AtomicU64 = AtomicU64::new(1);

/// Process-unique proxy identifier.
///
/// Indices in the directory refer to proxies by id; only the directory's
/// proxy table holds the proxy itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(u64);

impl ProxyId {
    fn next() -> Self {
        Self(NEXT_PROXY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}

/// Observable lifecycle state of a proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyState {
    /// Holds an address, object not built yet.
    AddressOnly,
    /// A converter is building the object right now.
    Materializing,
    /// Object present.
    Valid,
    /// Payload released; metadata kept for the next unit of work.
    Reset,
    /// Removed from the store. Terminal.
    Destroyed,
}

enum Slot {
    Empty,
    Materializing,
    Valid(DataObject),
    Destroyed,
}

struct Payload {
    slot: Slot,
    address: Option<Address>,
    converter: Option<Arc<dyn Converter>>,
    was_reset: bool,
    handles: Vec<ResetToken>,
    /// Bumped by every reset and destroy. A conversion started under an
    /// older epoch must not publish its result.
    epoch: u64,
}

impl Payload {
    fn state(&self) -> ProxyState {
        match self.slot {
            Slot::Valid(_) => ProxyState::Valid,
            Slot::Materializing => ProxyState::Materializing,
            Slot::Destroyed => ProxyState::Destroyed,
            Slot::Empty if self.address.is_some() && !self.was_reset => ProxyState::AddressOnly,
            Slot::Empty => ProxyState::Reset,
        }
    }

    fn invalidate_handles(&self) {
        for handle in &self.handles {
            handle.invalidate();
        }
    }
}

struct Meta {
    clid: Clid,
    name: String,
    sgkey: SgKey,
    transient_ids: BTreeSet<Clid>,
    aliases: BTreeSet<String>,
    is_const: bool,
    reset_only: bool,
    clear_address: bool,
}

/// One logical slot in the store.
///
/// Metadata (keys, symlinked class ids, aliases, flags) and payload
/// (object, address, converter, bound handles) are guarded separately so
/// that introspection never waits on a conversion.
pub struct DataProxy {
    id: ProxyId,
    meta: RwLock<Meta>,
    payload: Mutex<Payload>,
    ready: Condvar,
    conversions: AtomicU64,
}

impl DataProxy {
    fn build(
        clid: Clid,
        name: &str,
        sgkey: SgKey,
        slot: Slot,
        address: Option<Address>,
        converter: Option<Arc<dyn Converter>>,
    ) -> Self {
        Self {
            id: ProxyId::next(),
            meta: RwLock::new(Meta {
                clid,
                name: name.to_string(),
                sgkey,
                transient_ids: BTreeSet::from([clid]),
                aliases: BTreeSet::new(),
                is_const: false,
                reset_only: true,
                clear_address: false,
            }),
            payload: Mutex::new(Payload {
                slot,
                address,
                converter,
                was_reset: false,
                handles: Vec::new(),
                epoch: 0,
            }),
            ready: Condvar::new(),
            conversions: AtomicU64::new(0),
        }
    }

    /// A proxy holding a live object.
    pub fn with_object(
        object: DataObject,
        clid: Clid,
        name: &str,
        sgkey: SgKey,
        is_const: bool,
        reset_only: bool,
    ) -> Self {
        let proxy = Self::build(clid, name, sgkey, Slot::Valid(object), None, None);
        {
            let mut meta = proxy.meta_mut();
            meta.is_const = is_const;
            meta.reset_only = reset_only;
        }
        proxy
    }

    /// A proxy holding only an address, materialized on first access.
    ///
    /// With `clear_address` set, the address is dropped when the proxy is
    /// reset, so the next unit of work must supply a fresh one.
    pub fn with_address(
        address: Address,
        sgkey: SgKey,
        converter: Option<Arc<dyn Converter>>,
        clear_address: bool,
    ) -> Self {
        let clid = address.clid;
        let name = address.key.clone();
        let proxy = Self::build(clid, &name, sgkey, Slot::Empty, Some(address), converter);
        proxy.meta_mut().clear_address = clear_address;
        proxy
    }

    /// A proxy with neither object nor address.
    pub fn empty(clid: Clid, name: &str, sgkey: SgKey) -> Self {
        Self::build(clid, name, sgkey, Slot::Empty, None, None)
    }

    fn meta(&self) -> RwLockReadGuard<'_, Meta> {
        self.meta.read().expect("proxy meta lock poisoned")
    }

    fn meta_mut(&self) -> RwLockWriteGuard<'_, Meta> {
        self.meta.write().expect("proxy meta lock poisoned")
    }

    fn lock_payload(&self) -> MutexGuard<'_, Payload> {
        self.payload.lock().expect("proxy payload lock poisoned")
    }

    fn invalid_state(&self, state: ProxyState) -> ProxyError {
        let meta = self.meta();
        ProxyError::InvalidState {
            name: meta.name.clone(),
            clid: meta.clid,
            state,
        }
    }

    // -----------------------------------------------------------------------
    // Identity and metadata
    // -----------------------------------------------------------------------

    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// Primary class id.
    pub fn clid(&self) -> Clid {
        self.meta().clid
    }

    /// Primary key.
    pub fn name(&self) -> String {
        self.meta().name.clone()
    }

    /// Hashed key of the primary (name, clid) pair.
    pub fn sgkey(&self) -> SgKey {
        self.meta().sgkey
    }

    /// Every class id the object is reachable under, primary included.
    pub fn transient_ids(&self) -> Vec<Clid> {
        self.meta().transient_ids.iter().copied().collect()
    }

    /// `true` if the object is reachable under `clid`.
    pub fn transient_id(&self, clid: Clid) -> bool {
        self.meta().transient_ids.contains(&clid)
    }

    /// Record an additional class id. Returns `false` if already present.
    ///
    /// Only the directory should call this; it keeps its type index in step.
    pub fn add_transient_id(&self, clid: Clid) -> bool {
        self.meta_mut().transient_ids.insert(clid)
    }

    /// Secondary keys, sorted.
    pub fn aliases(&self) -> Vec<String> {
        self.meta().aliases.iter().cloned().collect()
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.meta().aliases.contains(alias)
    }

    /// `true` if `key` is the primary key or one of the aliases.
    pub fn known_as(&self, key: &str) -> bool {
        let meta = self.meta();
        meta.name == key || meta.aliases.contains(key)
    }

    /// Record an alias. Returns `false` if already present.
    pub fn add_alias(&self, alias: &str) -> bool {
        self.meta_mut().aliases.insert(alias.to_string())
    }

    pub fn remove_alias(&self, alias: &str) -> bool {
        self.meta_mut().aliases.remove(alias)
    }

    pub fn is_const(&self) -> bool {
        self.meta().is_const
    }

    /// Lock the object against modification.
    pub fn set_const(&self) {
        self.meta_mut().is_const = true;
    }

    /// `true` if a store clear only releases the payload.
    pub fn is_reset_only(&self) -> bool {
        self.meta().reset_only
    }

    pub fn set_reset_only(&self, reset_only: bool) {
        self.meta_mut().reset_only = reset_only;
    }

    // -----------------------------------------------------------------------
    // Payload
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ProxyState {
        self.lock_payload().state()
    }

    /// `true` if an object is attached. Never triggers conversion.
    pub fn is_valid_object(&self) -> bool {
        matches!(self.lock_payload().slot, Slot::Valid(_))
    }

    /// `true` if an address is held. Never triggers conversion.
    pub fn is_valid_address(&self) -> bool {
        let payload = self.lock_payload();
        !matches!(payload.slot, Slot::Destroyed) && payload.address.is_some()
    }

    /// `true` if the object is attached or can be built from an address.
    pub fn is_valid(&self) -> bool {
        let payload = self.lock_payload();
        match payload.slot {
            Slot::Valid(_) | Slot::Materializing => true,
            Slot::Destroyed => false,
            Slot::Empty => payload.address.is_some() && payload.converter.is_some(),
        }
    }

    /// `true` if the proxy was created from an address with a converter.
    pub fn has_provider(&self) -> bool {
        self.lock_payload().converter.is_some()
    }

    /// The attached object, without triggering conversion.
    pub fn object(&self) -> Option<DataObject> {
        match &self.lock_payload().slot {
            Slot::Valid(object) => Some(object.clone()),
            _ => None,
        }
    }

    pub fn address(&self) -> Option<Address> {
        self.lock_payload().address.clone()
    }

    /// Number of completed conversions since creation.
    pub fn conversion_count(&self) -> u64 {
        self.conversions.load(Ordering::Relaxed)
    }

    /// Attach a live object.
    ///
    /// Attaching the object that is already present is a no-op; attaching a
    /// different one fails.
    pub fn set_object(&self, object: DataObject) -> ProxyResult<()> {
        let mut payload = self.lock_payload();
        if let Slot::Valid(existing) = &payload.slot {
            if Arc::ptr_eq(existing, &object) {
                return Ok(());
            }
            drop(payload);
            let meta = self.meta();
            return Err(ProxyError::ObjectAlreadySet {
                name: meta.name.clone(),
                clid: meta.clid,
            });
        }
        let state = payload.state();
        if matches!(state, ProxyState::Materializing | ProxyState::Destroyed) {
            drop(payload);
            return Err(self.invalid_state(state));
        }
        payload.slot = Slot::Valid(object);
        payload.was_reset = false;
        Ok(())
    }

    /// Replace the object of a valid proxy, returning the previous one.
    pub fn swap_object(&self, object: DataObject) -> ProxyResult<DataObject> {
        let mut payload = self.lock_payload();
        match std::mem::replace(&mut payload.slot, Slot::Valid(object)) {
            Slot::Valid(previous) => Ok(previous),
            other => {
                payload.slot = other;
                let state = payload.state();
                drop(payload);
                Err(self.invalid_state(state))
            }
        }
    }

    /// Attach an address for later materialization.
    pub fn set_address(&self, address: Address) -> ProxyResult<()> {
        let mut payload = self.lock_payload();
        if matches!(payload.slot, Slot::Destroyed) {
            drop(payload);
            return Err(self.invalid_state(ProxyState::Destroyed));
        }
        payload.address = Some(address);
        payload.was_reset = false;
        Ok(())
    }

    pub fn set_converter(&self, converter: Arc<dyn Converter>) {
        self.lock_payload().converter = Some(converter);
    }

    /// The object, building it from the address if needed.
    ///
    /// Only one caller runs the converter; concurrent callers wait for its
    /// result. A failed conversion leaves the proxy as it was.
    pub fn access_object(&self) -> ProxyResult<DataObject> {
        let mut payload = self.lock_payload();
        while matches!(payload.slot, Slot::Materializing) {
            payload = self.ready.wait(payload).expect("proxy payload lock poisoned");
        }
        if let Slot::Valid(object) = &payload.slot {
            return Ok(object.clone());
        }

        let state = payload.state();
        if state == ProxyState::Destroyed {
            drop(payload);
            return Err(self.invalid_state(state));
        }
        let address = payload.address.clone();
        let converter = payload.converter.clone();
        let (address, converter) = match (address, converter) {
            (Some(address), Some(converter)) => (address, converter),
            (Some(_), None) => {
                drop(payload);
                let meta = self.meta();
                return Err(ProxyError::NoConverter {
                    name: meta.name.clone(),
                    clid: meta.clid,
                });
            }
            (None, _) => {
                drop(payload);
                return Err(self.invalid_state(state));
            }
        };
        payload.slot = Slot::Materializing;
        let epoch = payload.epoch;
        drop(payload);
        self.materialize(&address, converter.as_ref(), epoch)
    }

    fn materialize(
        &self,
        address: &Address,
        converter: &dyn Converter,
        epoch: u64,
    ) -> ProxyResult<DataObject> {
        debug!(proxy = %self.id, %address, "materializing object");
        let mut guard = MaterializeGuard {
            proxy: self,
            epoch,
            armed: true,
        };
        let result = converter.materialize(address);
        guard.armed = false;

        let mut payload = self.lock_payload();
        let still_ours = payload.epoch == epoch && matches!(payload.slot, Slot::Materializing);
        let outcome = match result {
            Ok(object) if still_ours => {
                payload.slot = Slot::Valid(object.clone());
                payload.was_reset = false;
                self.conversions.fetch_add(1, Ordering::Relaxed);
                Ok(object)
            }
            // Reset or destroyed while the converter ran.
            Ok(_) => {
                debug!(proxy = %self.id, "conversion result discarded after reset");
                Err(payload.state())
            }
            Err(source) => {
                if still_ours {
                    payload.slot = Slot::Empty;
                }
                drop(payload);
                self.ready.notify_all();
                let meta = self.meta();
                warn!(name = %meta.name, clid = %meta.clid, error = %source, "conversion failed");
                return Err(ProxyError::ConversionFailure {
                    name: meta.name.clone(),
                    clid: meta.clid,
                    source,
                });
            }
        };
        drop(payload);
        self.ready.notify_all();
        outcome.map_err(|state| self.invalid_state(state))
    }

    /// Release the payload but keep the proxy for reuse.
    ///
    /// A hard reset (parallel slots) also drops the address, as does a
    /// proxy created with `clear_address`. Bound tokens are invalidated.
    /// Returns the released object, if any.
    pub fn reset(&self, hard: bool) -> Option<DataObject> {
        let clear_address = hard || self.meta().clear_address;
        let mut payload = self.lock_payload();
        if matches!(payload.slot, Slot::Destroyed) {
            return None;
        }
        // A running conversion keeps going but its result is dropped.
        let released = match std::mem::replace(&mut payload.slot, Slot::Empty) {
            Slot::Valid(object) => Some(object),
            _ => None,
        };
        if clear_address {
            payload.address = None;
        }
        payload.was_reset = true;
        payload.epoch += 1;
        payload.invalidate_handles();
        drop(payload);
        self.meta_mut().is_const = false;
        self.ready.notify_all();
        released
    }

    /// Terminal removal: release everything and invalidate tokens.
    pub fn destroy(&self) -> Option<DataObject> {
        let mut payload = self.lock_payload();
        let released = match std::mem::replace(&mut payload.slot, Slot::Destroyed) {
            Slot::Valid(object) => Some(object),
            _ => None,
        };
        payload.address = None;
        payload.converter = None;
        payload.epoch += 1;
        payload.invalidate_handles();
        for handle in payload.handles.drain(..) {
            handle.unbind();
        }
        drop(payload);
        self.ready.notify_all();
        released
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    /// Register an observer to be invalidated on reset.
    ///
    /// Returns `false` if the token is already bound to another proxy or
    /// this proxy was destroyed. Rebinding to the same proxy re-arms it.
    pub fn bind_handle(&self, token: &ResetToken) -> bool {
        let mut payload = self.lock_payload();
        if matches!(payload.slot, Slot::Destroyed) || !token.bind(self.id) {
            return false;
        }
        if !payload.handles.iter().any(|h| h.same_as(token)) {
            payload.handles.push(token.clone());
        }
        true
    }

    /// Remove an observer. Returns `false` if it was not bound here.
    pub fn unbind_handle(&self, token: &ResetToken) -> bool {
        let mut payload = self.lock_payload();
        let before = payload.handles.len();
        payload.handles.retain(|h| !h.same_as(token));
        let removed = payload.handles.len() != before;
        if removed {
            token.unbind();
        }
        removed
    }

    pub fn handle_count(&self) -> usize {
        self.lock_payload().handles.len()
    }
}

/// Puts the proxy back to `Empty` if the converter panics.
struct MaterializeGuard<'a> {
    proxy: &'a DataProxy,
    epoch: u64,
    armed: bool,
}

impl Drop for MaterializeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut payload) = self.proxy.payload.lock() {
            if payload.epoch == self.epoch && matches!(payload.slot, Slot::Materializing) {
                payload.slot = Slot::Empty;
            }
        }
        self.proxy.ready.notify_all();
    }
}

impl fmt::Debug for DataProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        let meta = self.meta();
        f.debug_struct("DataProxy")
            .field("id", &self.id)
            .field("clid", &meta.clid)
            .field("name", &meta.name)
            .field("sgkey", &meta.sgkey)
            .field("transient_ids", &meta.transient_ids)
            .field("aliases", &meta.aliases)
            .field("state", &state)
            .finish()
    }
}
