use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use stash_pool::StringPool;
use stash_proxy::{DataObject, DataProxy, ObjectAddr, ProxyId};
use stash_types::{Clid, SgKey, StoreKind, DEFAULT_KEY};
use tracing::{debug, warn};

use crate::error::{DirectoryError, DirectoryResult};

/// Outcome of [`DataStore::clear_store`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Proxies whose payload was released; they stay indexed.
    pub reset: usize,
    /// Proxies destroyed and removed from every index.
    pub removed: usize,
}

/// Registry of `{clid → {name → proxy}}` for one store.
pub struct DataStore {
    kind: StoreKind,
    pool: Arc<StringPool>,
    /// Owning table. Every other map holds ids into it.
    proxies: HashMap<ProxyId, Arc<DataProxy>>,
    /// Insertion order, for stable iteration.
    order: Vec<ProxyId>,
    by_type: BTreeMap<Clid, BTreeMap<String, ProxyId>>,
    by_sgkey: HashMap<SgKey, ProxyId>,
    t2p: HashMap<ObjectAddr, ProxyId>,
}

impl DataStore {
    /// Create an empty directory that hashes names through `pool`.
    pub fn new(kind: StoreKind, pool: Arc<StringPool>) -> Self {
        Self {
            kind,
            pool,
            proxies: HashMap::new(),
            order: Vec::new(),
            by_type: BTreeMap::new(),
            by_sgkey: HashMap::new(),
            t2p: HashMap::new(),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: StoreKind) {
        self.kind = kind;
    }

    /// The string pool used for hashed keys.
    pub fn pool(&self) -> &Arc<StringPool> {
        &self.pool
    }

    /// Number of proxies owned by the directory.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn lookup_id(&self, clid: Clid, key: &str) -> Option<ProxyId> {
        self.by_type.get(&clid)?.get(key).copied()
    }

    fn index(&mut self, clid: Clid, name: &str, id: ProxyId) {
        self.by_type
            .entry(clid)
            .or_default()
            .insert(name.to_string(), id);
        let sgkey = self.pool.to_key(name, clid);
        self.by_sgkey.insert(sgkey, id);
    }

    /// Drop every index entry naming one of `ids`.
    fn purge(&mut self, ids: &HashSet<ProxyId>) {
        self.by_type.retain(|_, names| {
            names.retain(|_, id| !ids.contains(id));
            !names.is_empty()
        });
        self.by_sgkey.retain(|_, id| !ids.contains(id));
        self.t2p.retain(|_, id| !ids.contains(id));
        self.order.retain(|id| !ids.contains(id));
        for id in ids {
            self.proxies.remove(id);
        }
    }

    fn require_member(&self, proxy: &DataProxy) -> DirectoryResult<ProxyId> {
        let id = proxy.id();
        if self.proxies.contains_key(&id) {
            Ok(id)
        } else {
            Err(DirectoryError::UnknownProxy(id))
        }
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Index `proxy` under `clid` and its primary name.
    ///
    /// Re-adding the same proxy is a no-op. When `clid` differs from the
    /// proxy's primary class id it is recorded as a transient id.
    pub fn add_to_store(&mut self, clid: Clid, proxy: Arc<DataProxy>) -> DirectoryResult<()> {
        let name = proxy.name();
        let id = proxy.id();
        match self.lookup_id(clid, &name) {
            Some(existing) if existing == id => return Ok(()),
            Some(_) => {
                return Err(DirectoryError::DuplicateKey { clid, key: name });
            }
            None => {}
        }
        if clid != proxy.clid() {
            proxy.add_transient_id(clid);
        }
        if !self.proxies.contains_key(&id) {
            self.order.push(id);
        }
        let aliases = proxy.aliases();
        self.proxies.insert(id, proxy);
        self.index(clid, &name, id);
        for alias in aliases {
            if self.lookup_id(clid, &alias).is_none() {
                self.index(clid, &alias, id);
            }
        }
        debug!(%clid, key = %name, proxy = %id, "proxy added to store");
        Ok(())
    }

    /// Make the proxy reachable under an additional class id.
    ///
    /// Returns `Ok(false)` if the link already existed. Fails with
    /// [`DirectoryError::AmbiguousOwnership`] if `link` already resolves the
    /// proxy's name to a different proxy.
    pub fn add_symlink(&mut self, link: Clid, proxy: &Arc<DataProxy>) -> DirectoryResult<bool> {
        let id = self.require_member(proxy)?;
        let name = proxy.name();
        match self.lookup_id(link, &name) {
            Some(existing) if existing == id => {
                proxy.add_transient_id(link);
                return Ok(false);
            }
            Some(existing) => {
                return Err(DirectoryError::AmbiguousOwnership {
                    clid: link,
                    key: name,
                    existing,
                });
            }
            None => {}
        }
        proxy.add_transient_id(link);
        self.index(link, &name, id);
        for alias in proxy.aliases() {
            match self.lookup_id(link, &alias) {
                None => self.index(link, &alias, id),
                Some(other) if other != id => {
                    warn!(clid = %link, %alias, owner = %other, "alias already taken under symlinked clid");
                }
                Some(_) => {}
            }
        }
        debug!(clid = %link, key = %name, proxy = %id, "symlink added");
        Ok(true)
    }

    /// Make the proxy reachable under an additional name, for every class
    /// id it is reachable under.
    ///
    /// An alias held by another proxy moves to this one (the most recently
    /// aliased proxy wins). A name that is another proxy's primary key is
    /// never taken over. Returns `Ok(false)` if nothing changed.
    pub fn add_alias(&mut self, alias: &str, proxy: &Arc<DataProxy>) -> DirectoryResult<bool> {
        self.link_alias(alias, proxy, false)
    }

    /// Like [`add_alias`](Self::add_alias), but `alias` may also be another
    /// proxy's primary key. That proxy stays reachable only under its other
    /// names. Used to point a plain key at the latest of several versions.
    pub fn take_over_name(&mut self, alias: &str, proxy: &Arc<DataProxy>) -> DirectoryResult<bool> {
        self.link_alias(alias, proxy, true)
    }

    fn link_alias(
        &mut self,
        alias: &str,
        proxy: &Arc<DataProxy>,
        take_primary: bool,
    ) -> DirectoryResult<bool> {
        let id = self.require_member(proxy)?;
        if proxy.name() == alias {
            return Ok(false);
        }
        let clids = proxy.transient_ids();

        let mut displaced = Vec::new();
        for &clid in &clids {
            match self.lookup_id(clid, alias) {
                Some(other) if other != id => {
                    let owner = self.proxies.get(&other);
                    if !take_primary && owner.is_some_and(|p| p.name() == alias) {
                        return Err(DirectoryError::DuplicateKey {
                            clid,
                            key: alias.to_string(),
                        });
                    }
                    displaced.push(other);
                }
                _ => {}
            }
        }

        let mut changed = proxy.add_alias(alias);
        for &clid in &clids {
            if self.lookup_id(clid, alias) != Some(id) {
                self.index(clid, alias, id);
                changed = true;
            }
        }

        for other in displaced {
            self.drop_alias(alias, other);
            debug!(%alias, from = %other, to = %id, "alias moved");
        }
        Ok(changed)
    }

    /// Remove `alias` from proxy `owner` under every class id.
    fn drop_alias(&mut self, alias: &str, owner: ProxyId) {
        let mut clids = Vec::new();
        for (clid, names) in self.by_type.iter_mut() {
            if names.get(alias) == Some(&owner) {
                names.remove(alias);
                clids.push(*clid);
            }
        }
        for clid in clids {
            let sgkey = self.pool.hash(alias, clid);
            if self.by_sgkey.get(&sgkey) == Some(&owner) {
                self.by_sgkey.remove(&sgkey);
            }
        }
        self.by_type.retain(|_, names| !names.is_empty());
        if let Some(previous) = self.proxies.get(&owner) {
            previous.remove_alias(alias);
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Exact lookup by class id and name (primary key or alias).
    pub fn proxy(&self, clid: Clid, key: &str) -> Option<Arc<DataProxy>> {
        let id = self.lookup_id(clid, key)?;
        self.proxies.get(&id).cloned()
    }

    /// Lookup that optionally requires the proxy to be valid.
    pub fn proxy_checked(&self, clid: Clid, key: &str, require_valid: bool) -> Option<Arc<DataProxy>> {
        self.proxy(clid, key)
            .filter(|p| !require_valid || p.is_valid())
    }

    /// Lookup by class id alone.
    ///
    /// Returns the only proxy of that type, or the one recorded under
    /// [`DEFAULT_KEY`] when there are several.
    pub fn proxy_by_type(&self, clid: Clid) -> Option<Arc<DataProxy>> {
        let names = self.by_type.get(&clid)?;
        let mut ids = names.values();
        let first = *ids.next()?;
        if ids.all(|id| *id == first) {
            return self.proxies.get(&first).cloned();
        }
        names
            .get(DEFAULT_KEY)
            .and_then(|id| self.proxies.get(id))
            .cloned()
    }

    /// Lookup by hashed key.
    pub fn proxy_exact(&self, sgkey: SgKey) -> Option<Arc<DataProxy>> {
        let id = self.by_sgkey.get(&sgkey)?;
        self.proxies.get(id).cloned()
    }

    pub fn proxy_by_id(&self, id: ProxyId) -> Option<Arc<DataProxy>> {
        self.proxies.get(&id).cloned()
    }

    /// `true` if the proxy is owned by this directory.
    pub fn contains(&self, proxy: &DataProxy) -> bool {
        self.proxies.contains_key(&proxy.id())
    }

    // -----------------------------------------------------------------------
    // Reverse (object → proxy) map
    // -----------------------------------------------------------------------

    /// Remember which proxy owns the object at `addr`.
    pub fn t2p_register(&mut self, addr: ObjectAddr, proxy: &DataProxy) -> DirectoryResult<()> {
        let id = self.require_member(proxy)?;
        match self.t2p.get(&addr) {
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => {
                let existing_key = self
                    .proxies
                    .get(existing)
                    .map(|p| p.name())
                    .unwrap_or_default();
                Err(DirectoryError::DuplicateObject { addr, existing_key })
            }
            None => {
                self.t2p.insert(addr, id);
                Ok(())
            }
        }
    }

    pub fn t2p_remove(&mut self, addr: ObjectAddr) -> Option<ProxyId> {
        self.t2p.remove(&addr)
    }

    /// Forget every reverse entry pointing at `proxy`. Never converts.
    pub fn t2p_remove_proxy(&mut self, proxy: &DataProxy) -> usize {
        let id = proxy.id();
        let before = self.t2p.len();
        self.t2p.retain(|_, owner| *owner != id);
        before - self.t2p.len()
    }

    /// The proxy owning the object at `addr`.
    pub fn locate_persistent(&self, addr: ObjectAddr) -> Option<Arc<DataProxy>> {
        let id = self.t2p.get(&addr)?;
        self.proxies.get(id).cloned()
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove a proxy.
    ///
    /// Without `force_remove`, a reset-only proxy only releases its payload
    /// and stays indexed. Otherwise the proxy leaves every index before it is
    /// destroyed. Returns the released object.
    pub fn remove_proxy(
        &mut self,
        proxy: &Arc<DataProxy>,
        force_remove: bool,
        hard_reset: bool,
    ) -> DirectoryResult<Option<DataObject>> {
        let id = self.require_member(proxy)?;
        self.t2p_remove_proxy(proxy);
        if !force_remove && proxy.is_reset_only() {
            return Ok(proxy.reset(hard_reset));
        }
        self.purge(&HashSet::from([id]));
        debug!(proxy = %id, key = %proxy.name(), "proxy removed");
        Ok(proxy.destroy())
    }

    /// Clear the directory at the end of a unit of work.
    ///
    /// With `force_remove` every proxy is destroyed. Otherwise reset-only
    /// proxies are reset in place (hard reset for parallel slots) and the
    /// rest are destroyed. The reverse map is emptied either way.
    pub fn clear_store(&mut self, force_remove: bool, hard_reset: bool) -> ClearReport {
        let mut report = ClearReport::default();
        self.t2p.clear();

        let mut doomed = HashSet::new();
        for id in &self.order {
            let Some(proxy) = self.proxies.get(id) else {
                continue;
            };
            if force_remove || !proxy.is_reset_only() {
                doomed.insert(*id);
            } else {
                proxy.reset(hard_reset);
                report.reset += 1;
            }
        }

        let destroyed: Vec<Arc<DataProxy>> = doomed
            .iter()
            .filter_map(|id| self.proxies.get(id).cloned())
            .collect();
        self.purge(&doomed);
        for proxy in destroyed {
            proxy.destroy();
            report.removed += 1;
        }
        debug!(
            kind = %self.kind,
            reset = report.reset,
            removed = report.removed,
            "store cleared"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of names (keys and aliases) recorded under `clid`.
    pub fn type_count(&self, clid: Clid) -> usize {
        self.by_type.get(&clid).map_or(0, BTreeMap::len)
    }

    /// Names recorded under `clid`, sorted.
    pub fn keys(&self, clid: Clid, include_alias: bool, only_valid: bool) -> Vec<String> {
        let Some(names) = self.by_type.get(&clid) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|(name, id)| {
                let proxy = self.proxies.get(id)?;
                if !include_alias && proxy.name() != *name {
                    return None;
                }
                if only_valid && !proxy.is_valid() {
                    return None;
                }
                Some(name.clone())
            })
            .collect()
    }

    /// Every class id with at least one entry, sorted.
    pub fn clids(&self) -> Vec<Clid> {
        self.by_type.keys().copied().collect()
    }

    /// Class ids under which `key` is recorded, sorted.
    pub fn clids_for_key(&self, key: &str) -> Vec<Clid> {
        self.by_type
            .iter()
            .filter(|(_, names)| names.contains_key(key))
            .map(|(clid, _)| *clid)
            .collect()
    }

    /// `(name, proxy)` pairs recorded under `clid`, sorted by name.
    pub fn proxies_of(&self, clid: Clid) -> Vec<(String, Arc<DataProxy>)> {
        let Some(names) = self.by_type.get(&clid) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|(name, id)| Some((name.clone(), self.proxies.get(id)?.clone())))
            .collect()
    }

    /// Every proxy in insertion order.
    pub fn proxies(&self) -> Vec<Arc<DataProxy>> {
        self.order
            .iter()
            .filter_map(|id| self.proxies.get(id).cloned())
            .collect()
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("kind", &self.kind)
            .field("proxies", &self.proxies.len())
            .field("clids", &self.by_type.len())
            .field("t2p", &self.t2p.len())
            .finish()
    }
}
