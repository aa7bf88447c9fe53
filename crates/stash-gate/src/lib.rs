//! Store facade for the Stash transient object store.
//!
//! A [`StoreGate`] lets independent processing units publish and retrieve
//! objects by (class id, key) without knowing about each other. Objects
//! may be recorded directly, or registered as addresses that a
//! [`Converter`](stash_proxy::Converter) materializes on first access.
//! Each object can be reached under several class ids (symlinks) and
//! several names (aliases), and the store is cleared between units of
//! work.
//!
//! # Quick Start
//!
//! ```rust
//! use stash_gate::{SlotManagement, StoreConfig, StoreGate, StoreType};
//! use stash_types::Clid;
//!
//! struct Jet(f64);
//! impl StoreType for Jet {
//!     const CLID: Clid = Clid::new(7);
//! }
//!
//! let gate = StoreGate::new(StoreConfig::default());
//! gate.record(Jet(41.5), "LeadingJet").unwrap();
//! assert_eq!(gate.retrieve::<Jet>("LeadingJet").unwrap().0, 41.5);
//!
//! gate.clear_store(true).unwrap();
//! assert!(gate.retrieve::<Jet>("LeadingJet").is_err());
//! ```

pub mod capability;
pub mod config;
pub mod dump;
pub mod error;
pub mod gate;
pub mod provider;
pub mod registry;

// Re-exports for convenience.
pub use capability::{ProviderAccess, ProxyDict, SlotManagement};
pub use config::{ConfigError, ConfigResult, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use gate::{RecordOptions, StoreGate};
pub use provider::{ProviderError, ProviderResult, ProxyProvider};
pub use registry::{NoTypes, StaticTypeRegistry, StoreType, TypeRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use stash_proxy::{Address, ConvertError, Converter, DataObject, DataProxy, ProxyState, ResetToken};
    use stash_store::DataStore;
    use stash_types::{Clid, SlotId, VersionedKey};

    #[derive(Debug, PartialEq)]
    struct Jet(u32);
    impl StoreType for Jet {
        const CLID: Clid = Clid::new(7);
    }

    #[derive(Debug, PartialEq)]
    struct Track(u32);
    impl StoreType for Track {
        const CLID: Clid = Clid::new(9);
    }

    const FOO: Clid = Clid::new(7);
    const BASE: Clid = Clid::new(3);

    fn gate() -> StoreGate {
        StoreGate::new(StoreConfig::default())
    }

    fn object(value: u64) -> DataObject {
        Arc::new(value)
    }

    /// Converter that counts calls and returns the locator as a `String`.
    fn counting_converter(calls: Arc<AtomicUsize>, delay: Duration) -> Arc<dyn Converter> {
        Arc::new(move |addr: &Address| -> Result<DataObject, ConvertError> {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            Ok(Arc::new(addr.locator.clone()))
        })
    }

    fn failing_converter() -> Arc<dyn Converter> {
        Arc::new(|_: &Address| -> Result<DataObject, ConvertError> {
            Err(ConvertError::new("corrupt block"))
        })
    }

    /// Supplies address-only proxies for keys starting with "disk".
    struct DiskProvider {
        calls: Arc<AtomicUsize>,
        loads: AtomicUsize,
    }

    impl DiskProvider {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl ProxyProvider for DiskProvider {
        fn preload_proxies(&self, store: &mut DataStore) -> ProviderResult<()> {
            let address = Address::new(Track::CLID, "diskPreloaded", "blk:0");
            let sgkey = store.pool().to_key(&address.key, address.clid);
            let converter = counting_converter(Arc::clone(&self.calls), Duration::ZERO);
            let proxy = DataProxy::with_address(address, sgkey, Some(converter), false);
            store.add_to_store(Track::CLID, Arc::new(proxy))?;
            Ok(())
        }

        fn load_proxies(&self, _store: &mut DataStore) -> ProviderResult<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn retrieve_proxy(
            &self,
            clid: Clid,
            key: &str,
            store: &mut DataStore,
        ) -> ProviderResult<Option<Arc<DataProxy>>> {
            if !key.starts_with("disk") {
                return Ok(None);
            }
            let sgkey = store.pool().to_key(key, clid);
            let converter = counting_converter(Arc::clone(&self.calls), Duration::ZERO);
            let address = Address::new(clid, key, format!("blk:{key}"));
            Ok(Some(Arc::new(DataProxy::with_address(
                address,
                sgkey,
                Some(converter),
                false,
            ))))
        }
    }

    // -----------------------------------------------------------------------
    // 1. Record, symlink, alias, forced clear
    // -----------------------------------------------------------------------
    #[test]
    fn record_link_alias_clear_scenario() {
        let gate = gate();
        let x = object(42);
        gate.record_object(x.clone(), FOO, "Foo", RecordOptions::default())
            .unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Foo").unwrap(), &x));

        gate.sym_link(FOO, "Foo", BASE).unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(BASE, "Foo").unwrap(), &x));

        gate.set_alias(FOO, "Foo", "Bar").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Bar").unwrap(), &x));

        gate.clear_store(true).unwrap();
        let err = gate.retrieve_object(FOO, "Foo").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(gate.retrieve_object(BASE, "Foo").unwrap_err().is_not_found());
        assert!(gate.retrieve_object(FOO, "Bar").unwrap_err().is_not_found());
    }

    // -----------------------------------------------------------------------
    // 2. Concurrent retrieval converts once
    // -----------------------------------------------------------------------
    #[test]
    fn concurrent_retrieve_converts_once() {
        let gate = Arc::new(gate());
        let calls = Arc::new(AtomicUsize::new(0));
        let converter = counting_converter(Arc::clone(&calls), Duration::from_millis(50));
        gate.record_address(Address::new(Clid::new(5), "Slow", "blk:7"), Some(converter), false)
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gate.retrieve_object(Clid::new(5), "Slow").unwrap()
                })
            })
            .collect();
        let objects: Vec<DataObject> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&objects[0], &objects[1]));
        assert_eq!(objects[0].downcast_ref::<String>().unwrap(), "blk:7");
    }

    // -----------------------------------------------------------------------
    // 3. Typed round trip and wrong type
    // -----------------------------------------------------------------------
    #[test]
    fn typed_round_trip() {
        let gate = gate();
        let jet = gate.record(Jet(3), "J").unwrap();
        let back = gate.retrieve::<Jet>("J").unwrap();
        assert!(Arc::ptr_eq(&jet, &back));
    }

    #[test]
    fn wrong_type_is_distinct_error() {
        let gate = gate();
        gate.record(Jet(3), "J").unwrap();
        let err = gate.retrieve_as::<Track>(Jet::CLID, "J").unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }

    #[test]
    fn retrieve_default_picks_only_entry() {
        let gate = gate();
        let jet = gate.record(Jet(1), "Only").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_default::<Jet>().unwrap(), &jet));
        gate.record(Jet(2), "Second").unwrap();
        assert!(gate.retrieve_default::<Jet>().unwrap_err().is_not_found());
    }

    // -----------------------------------------------------------------------
    // 4. Duplicate records leave the store unchanged
    // -----------------------------------------------------------------------
    #[test]
    fn duplicate_key_preserves_existing() {
        let gate = gate();
        let first = object(1);
        gate.record_object(first.clone(), FOO, "K", RecordOptions::default())
            .unwrap();
        let err = gate
            .record_object(object(2), FOO, "K", RecordOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "K").unwrap(), &first));
        assert_eq!(gate.proxies().unwrap().len(), 1);
    }

    #[test]
    fn same_object_twice_is_rejected_by_default() {
        let gate = gate();
        let x = object(1);
        gate.record_object(x.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        let err = gate
            .record_object(x, FOO, "B", RecordOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateObject { existing_key, .. } if existing_key == "A"));
        assert!(gate.retrieve_object(FOO, "B").unwrap_err().is_not_found());
    }

    #[test]
    fn same_object_same_clid_becomes_alias() {
        let gate = gate();
        let x = object(1);
        let opts = RecordOptions {
            return_existing: true,
            ..RecordOptions::default()
        };
        let p1 = gate.record_object(x.clone(), FOO, "A", opts).unwrap();
        let p2 = gate.record_object(x.clone(), FOO, "B", opts).unwrap();
        assert_eq!(p1.id(), p2.id());
        assert!(p1.has_alias("B"));
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "B").unwrap(), &x));
    }

    #[test]
    fn same_object_same_key_becomes_symlink() {
        let gate = gate();
        let x = object(1);
        let opts = RecordOptions {
            return_existing: true,
            ..RecordOptions::default()
        };
        let p1 = gate.record_object(x.clone(), FOO, "A", opts).unwrap();
        let p2 = gate.record_object(x.clone(), BASE, "A", opts).unwrap();
        assert_eq!(p1.id(), p2.id());
        assert!(p1.transient_id(BASE));
        assert!(Arc::ptr_eq(&gate.retrieve_object(BASE, "A").unwrap(), &x));
    }

    #[test]
    fn same_object_other_key_and_clid_fails() {
        let gate = gate();
        let x = object(1);
        let opts = RecordOptions {
            return_existing: true,
            ..RecordOptions::default()
        };
        gate.record_object(x.clone(), FOO, "A", opts).unwrap();
        let err = gate.record_object(x, BASE, "B", opts).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateObject { .. }));
        assert!(gate.clids().unwrap() == vec![FOO]);
    }

    #[test]
    fn invalid_key_rejected() {
        let gate = gate();
        let err = gate
            .record_object(object(1), FOO, "", RecordOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    // -----------------------------------------------------------------------
    // 5. Links are idempotent and ownership is never ambiguous
    // -----------------------------------------------------------------------
    #[test]
    fn links_are_idempotent() {
        let gate = gate();
        let x = object(1);
        gate.record_object(x.clone(), FOO, "Foo", RecordOptions::default())
            .unwrap();
        gate.set_alias(FOO, "Foo", "Bar").unwrap();
        gate.set_alias(FOO, "Foo", "Bar").unwrap();
        gate.sym_link(FOO, "Foo", BASE).unwrap();
        gate.sym_link_object(&x, BASE).unwrap();
        let proxy = gate.proxy(FOO, "Foo").unwrap().unwrap();
        assert_eq!(proxy.aliases(), vec!["Bar".to_string()]);
        assert_eq!(proxy.transient_ids(), vec![BASE, FOO]);
    }

    #[test]
    fn symlink_onto_other_owner_is_ambiguous() {
        let gate = gate();
        gate.record_object(object(1), BASE, "Foo", RecordOptions::default())
            .unwrap();
        gate.record_object(object(2), FOO, "Foo", RecordOptions::default())
            .unwrap();
        let err = gate.sym_link(FOO, "Foo", BASE).unwrap_err();
        assert!(matches!(err, StoreError::AmbiguousOwnership { .. }));
    }

    #[test]
    fn alias_reaches_symlinked_clids() {
        let gate = gate();
        let x = object(1);
        gate.record_object(x.clone(), FOO, "Foo", RecordOptions::default())
            .unwrap();
        gate.sym_link(FOO, "Foo", BASE).unwrap();
        gate.set_alias_object(&x, "Bar").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(BASE, "Bar").unwrap(), &x));
    }

    // Checks the current "latest alias wins" behavior, which callers must
    // not rely on.
    #[test]
    fn alias_follows_latest_record() {
        let gate = gate();
        let old = object(1);
        let new = object(2);
        gate.record_object(old.clone(), FOO, "V1", RecordOptions::default())
            .unwrap();
        gate.record_object(new.clone(), FOO, "V2", RecordOptions::default())
            .unwrap();
        gate.set_alias(FOO, "V1", "Latest").unwrap();
        gate.set_alias(FOO, "V2", "Latest").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Latest").unwrap(), &new));
    }

    #[test]
    fn auto_symlinks_follow_type_registry() {
        let types = Arc::new(StaticTypeRegistry::new());
        types.register(Jet::CLID, "Jet", &[BASE]);
        let gate = gate().with_type_registry(types);
        let jet = gate.record(Jet(5), "J").unwrap();
        let via_base = gate.retrieve_object(BASE, "J").unwrap();
        assert!(via_base.downcast::<Jet>().is_ok_and(|j| Arc::ptr_eq(&j, &jet)));
    }

    // -----------------------------------------------------------------------
    // 6. Reset versus destroy
    // -----------------------------------------------------------------------
    #[test]
    fn soft_clear_keeps_reset_only_proxies() {
        let gate = gate();
        let proxy = gate
            .record_object(object(1), FOO, "Foo", RecordOptions::default())
            .unwrap();
        gate.set_alias(FOO, "Foo", "Bar").unwrap();
        let report = gate.clear_store(false).unwrap();
        assert_eq!(report.reset, 1);

        assert!(!proxy.is_valid_object());
        assert_eq!(proxy.name(), "Foo");
        assert_eq!(proxy.aliases(), vec!["Bar".to_string()]);
        let err = gate.retrieve_object(FOO, "Foo").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidState {
                state: ProxyState::Reset,
                ..
            }
        ));
        // The slot can be filled again.
        let again = object(2);
        gate.record_object(again.clone(), FOO, "Foo", RecordOptions::default())
            .unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Bar").unwrap(), &again));
    }

    #[test]
    fn soft_clear_destroys_non_reset_only() {
        let gate = gate();
        let opts = RecordOptions {
            reset_only: false,
            ..RecordOptions::default()
        };
        let proxy = gate.record_object(object(1), FOO, "Foo", opts).unwrap();
        gate.clear_store(false).unwrap();
        assert_eq!(proxy.state(), ProxyState::Destroyed);
        assert!(gate.proxy(FOO, "Foo").unwrap().is_none());
    }

    #[test]
    fn address_survives_soft_clear_in_serial_mode() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let converter = counting_converter(Arc::clone(&calls), Duration::ZERO);
        let proxy = gate
            .record_address(Address::new(FOO, "Lazy", "blk:1"), Some(converter), false)
            .unwrap();
        gate.retrieve_object(FOO, "Lazy").unwrap();
        gate.clear_store(false).unwrap();
        assert!(proxy.is_valid_address());
        gate.retrieve_object(FOO, "Lazy").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parallel_slots_hard_reset_addresses() {
        let gate = gate();
        gate.set_slot_number(SlotId::new(1), 2).unwrap();
        assert_eq!(gate.slot(), SlotId::new(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let converter = counting_converter(calls, Duration::ZERO);
        let proxy = gate
            .record_address(Address::new(FOO, "Lazy", "blk:1"), Some(converter), false)
            .unwrap();
        gate.retrieve_object(FOO, "Lazy").unwrap();
        gate.clear_store(false).unwrap();
        assert!(!proxy.is_valid_address());
        assert!(!gate.contains(FOO, "Lazy").unwrap());
    }

    // -----------------------------------------------------------------------
    // 7. Providers and conversion failures
    // -----------------------------------------------------------------------
    #[test]
    fn provider_supplies_proxy_on_miss() {
        let gate = gate();
        let provider = Arc::new(DiskProvider::new());
        gate.set_provider(provider.clone()).unwrap();

        assert!(gate.contains(Track::CLID, "diskTracks").unwrap());
        let obj = gate.retrieve_object(Track::CLID, "diskTracks").unwrap();
        assert_eq!(obj.downcast_ref::<String>().unwrap(), "blk:diskTracks");
        assert!(gate.transient_contains(Track::CLID, "diskTracks").unwrap());
        assert!(gate.retrieve_object(Track::CLID, "memTracks").unwrap_err().is_not_found());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn provider_preload_registers_addresses() {
        let gate = gate();
        gate.set_provider(Arc::new(DiskProvider::new())).unwrap();
        assert!(!gate.transient_contains(Track::CLID, "diskPreloaded").unwrap());
        assert_eq!(gate.keys(Track::CLID, false, true).unwrap(), vec!["diskPreloaded"]);
        gate.retrieve_object(Track::CLID, "diskPreloaded").unwrap();
        assert!(gate.transient_contains(Track::CLID, "diskPreloaded").unwrap());
    }

    #[test]
    fn load_event_proxies_once_per_unit_of_work() {
        let gate = gate();
        assert!(!gate.load_event_proxies().unwrap());
        let provider = Arc::new(DiskProvider::new());
        gate.set_provider(provider.clone()).unwrap();
        assert!(gate.load_event_proxies().unwrap());
        assert!(!gate.load_event_proxies().unwrap());
        gate.clear_store(false).unwrap();
        assert!(gate.load_event_proxies().unwrap());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn conversion_failure_leaves_address_only() {
        let gate = gate();
        let proxy = gate
            .record_address(Address::new(FOO, "Bad", "blk:9"), Some(failing_converter()), false)
            .unwrap();
        let err = gate.retrieve_object(FOO, "Bad").unwrap_err();
        assert!(matches!(err, StoreError::ConversionFailure { .. }));
        assert_eq!(proxy.state(), ProxyState::AddressOnly);
    }

    #[test]
    fn address_without_converter_fails_conversion() {
        let gate = gate();
        gate.record_address(Address::new(FOO, "Orphan", "blk:3"), None, false)
            .unwrap();
        assert!(!gate.contains(FOO, "Orphan").unwrap());
        let err = gate.retrieve_object(FOO, "Orphan").unwrap_err();
        assert!(matches!(err, StoreError::ConversionFailure { .. }));
    }

    #[test]
    fn record_address_twice_is_duplicate() {
        let gate = gate();
        gate.record_address(Address::new(FOO, "A", "blk:1"), None, false)
            .unwrap();
        let err = gate
            .record_address(Address::new(FOO, "A", "blk:2"), None, false)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn record_address_fills_reset_proxy() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let converter = counting_converter(Arc::clone(&calls), Duration::ZERO);
        let opts = RecordOptions::default();
        gate.record_object(object(1), FOO, "A", opts).unwrap();
        gate.clear_store(false).unwrap();
        let proxy = gate
            .record_address(Address::new(FOO, "A", "blk:5"), Some(converter), false)
            .unwrap();
        assert_eq!(proxy.state(), ProxyState::AddressOnly);
        let obj = gate.retrieve_object(FOO, "A").unwrap();
        assert_eq!(obj.downcast_ref::<String>().unwrap(), "blk:5");
    }

    // -----------------------------------------------------------------------
    // 8. Renames
    // -----------------------------------------------------------------------
    #[test]
    fn rename_redirects_new_lookups() {
        let gate = gate();
        let jet = gate.record(Jet(1), "NewJets").unwrap();
        assert!(gate.retrieve::<Jet>("OldJets").unwrap_err().is_not_found());
        let outcome = gate.add_rename(Jet::CLID, "OldJets", "NewJets");
        assert_eq!(outcome.added, 1);
        assert!(Arc::ptr_eq(&gate.retrieve::<Jet>("OldJets").unwrap(), &jet));
    }

    #[test]
    fn rename_is_append_only() {
        let gate = gate();
        gate.record(Jet(1), "First").unwrap();
        gate.record(Jet(2), "Second").unwrap();
        gate.add_rename(Jet::CLID, "Old", "First");
        let outcome = gate.add_rename(Jet::CLID, "Old", "Second");
        assert_eq!(outcome.kept, 1);
        assert_eq!(gate.retrieve::<Jet>("Old").unwrap().0, 1);
    }

    #[test]
    fn renames_survive_clear() {
        let gate = gate();
        gate.add_rename(Jet::CLID, "Old", "New");
        gate.clear_store(true).unwrap();
        let jet = gate.record(Jet(4), "New").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve::<Jet>("Old").unwrap(), &jet));
    }

    // -----------------------------------------------------------------------
    // 9. Removal and payload release
    // -----------------------------------------------------------------------
    #[test]
    fn remove_resets_reset_only_proxy() {
        let gate = gate();
        let x = object(1);
        let proxy = gate
            .record_object(x.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        gate.remove(&x).unwrap();
        assert_eq!(proxy.state(), ProxyState::Reset);
        assert!(gate.proxy(FOO, "A").unwrap().is_some());
        assert!(matches!(gate.remove(&x), Err(StoreError::UnknownObject(_))));
    }

    #[test]
    fn remove_data_and_proxy_unindexes() {
        let gate = gate();
        let x = object(1);
        gate.record_object(x.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        gate.sym_link(FOO, "A", BASE).unwrap();
        gate.remove_data_and_proxy(&x).unwrap();
        assert!(gate.proxy(FOO, "A").unwrap().is_none());
        assert!(gate.proxy(BASE, "A").unwrap().is_none());
        // The object may be recorded again.
        gate.record_object(x, FOO, "B", RecordOptions::default())
            .unwrap();
    }

    #[test]
    fn remove_never_materializes() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let converter = counting_converter(Arc::clone(&calls), Duration::ZERO);
        let proxy = gate
            .record_address(Address::new(FOO, "Lazy", "blk:1"), Some(converter), false)
            .unwrap();
        gate.remove_proxy(&proxy, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(proxy.state(), ProxyState::Destroyed);
    }

    #[test]
    fn release_object_keeps_key() {
        let gate = gate();
        let x = object(1);
        gate.record_object(x.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        let released = gate.release_object(FOO, "A").unwrap().unwrap();
        assert!(Arc::ptr_eq(&released, &x));
        assert!(!gate.transient_contains(FOO, "A").unwrap());
        assert_eq!(gate.keys(FOO, false, false).unwrap(), vec!["A"]);
        // No longer owned: it can be recorded elsewhere.
        gate.record_object(x, FOO, "B", RecordOptions::default())
            .unwrap();
    }

    #[test]
    fn clear_proxy_payload_requires_membership() {
        let gate = gate();
        let proxy = gate
            .record_object(object(1), FOO, "A", RecordOptions::default())
            .unwrap();
        assert!(gate.clear_proxy_payload(&proxy).unwrap().is_some());
        let stray = Arc::new(DataProxy::empty(FOO, "Stray", gate.string_to_key("Stray", FOO)));
        assert!(matches!(
            gate.clear_proxy_payload(&stray),
            Err(StoreError::UnknownProxy(_))
        ));
    }

    #[test]
    fn private_copy_releases_proxy() {
        let gate = gate();
        let x = object(1);
        gate.record_object(x.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        let copy = gate.retrieve_private_copy(FOO, "A").unwrap();
        assert!(Arc::ptr_eq(&copy, &x));
        assert!(!gate.transient_contains(FOO, "A").unwrap());
        assert!(matches!(
            gate.retrieve_private_copy(FOO, "A"),
            Err(StoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn transient_swap_exchanges_payloads() {
        let gate = gate();
        let a = object(1);
        let b = object(2);
        gate.record_object(a.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        gate.record_object(b.clone(), FOO, "B", RecordOptions::default())
            .unwrap();
        gate.transient_swap(FOO, "A", "B").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "A").unwrap(), &b));
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "B").unwrap(), &a));
        // Reverse map follows the objects.
        gate.set_alias_object(&a, "NowB").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "NowB").unwrap(), &a));
        assert!(gate.transient_swap(FOO, "A", "Missing").unwrap_err().is_not_found());
    }

    #[test]
    fn set_const_locks_object() {
        let gate = gate();
        let x = object(1);
        let proxy = gate
            .record_object(x.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        assert!(!proxy.is_const());
        gate.set_const(&x).unwrap();
        assert!(proxy.is_const());
        assert!(gate.set_const(&object(9)).unwrap_err().is_not_found());
    }

    // -----------------------------------------------------------------------
    // 10. Handles
    // -----------------------------------------------------------------------
    #[test]
    fn clear_invalidates_bound_tokens() {
        let gate = gate();
        gate.record(Jet(1), "J").unwrap();
        let token = ResetToken::new();
        gate.bind_handle_to_proxy(Jet::CLID, "J", &token).unwrap();
        assert!(token.is_valid());
        gate.clear_store(false).unwrap();
        assert!(!token.is_valid());
    }

    #[test]
    fn commit_invalidates_newly_bound_tokens() {
        let gate = gate();
        gate.record(Jet(1), "J").unwrap();
        let token = ResetToken::new();
        gate.bind_handle_to_proxy(Jet::CLID, "J", &token).unwrap();
        assert_eq!(gate.commit_new_data_objects(), 1);
        assert!(!token.is_valid());
        assert_eq!(gate.commit_new_data_objects(), 0);
    }

    #[test]
    fn token_cannot_bind_two_proxies() {
        let gate = gate();
        gate.record(Jet(1), "A").unwrap();
        gate.record(Jet(2), "B").unwrap();
        let token = ResetToken::new();
        gate.bind_handle_to_proxy(Jet::CLID, "A", &token).unwrap();
        let err = gate.bind_handle_to_proxy(Jet::CLID, "B", &token).unwrap_err();
        assert!(matches!(err, StoreError::HandleBound { .. }));
    }

    // -----------------------------------------------------------------------
    // 11. Introspection, keys, pools, remaps, arenas
    // -----------------------------------------------------------------------
    #[test]
    fn introspection() {
        let gate = gate();
        gate.record_object(object(1), FOO, "A", RecordOptions::default())
            .unwrap();
        gate.record_object(object(2), BASE, "A", RecordOptions::default())
            .unwrap();
        assert_eq!(gate.clid("A").unwrap(), Some(BASE));
        assert_eq!(gate.clids_for_key("A").unwrap(), vec![BASE, FOO]);
        assert_eq!(gate.clid("Nope").unwrap(), None);
        assert_eq!(gate.type_count(FOO).unwrap(), 1);
        assert_eq!(gate.create_key(FOO).unwrap(), "2");
        let sgkey = gate.string_to_key("A", FOO);
        let found = gate.proxy_exact(sgkey).unwrap().unwrap();
        assert_eq!(found.clid(), FOO);
        let entry = gate.key_to_string(sgkey).unwrap();
        assert_eq!((entry.name.as_str(), entry.clid), ("A", FOO));
    }

    #[test]
    fn dump_lists_flags() {
        let types = Arc::new(StaticTypeRegistry::new());
        types.register(FOO, "Jet", &[]);
        let gate = gate().with_type_registry(types);
        let opts = RecordOptions {
            allow_mods: false,
            ..RecordOptions::default()
        };
        gate.record_object(object(1), FOO, "A", opts).unwrap();
        gate.set_alias(FOO, "A", "AA").unwrap();
        let dump = gate.dump().unwrap();
        assert!(dump.contains("clid 7 (Jet): 2 entries"));
        assert!(dump.contains("locked"));
        assert!(dump.contains("key: AA -> A"));
    }

    #[test]
    fn merge_string_pool_imports_keys() {
        let gate = gate();
        let other = stash_pool::StringPool::new();
        let key = other.to_key("Imported", FOO);
        assert!(gate.merge_string_pool(&other));
        assert_eq!(gate.key_to_string(key).unwrap().name, "Imported");
        assert!(gate.register_key(key, "Imported", FOO).is_ok());
        assert!(matches!(
            gate.register_key(key, "Other", FOO),
            Err(StoreError::Pool(_))
        ));
    }

    #[test]
    fn remaps_cleared_with_store() {
        let gate = gate();
        gate.remap(FOO, "Src", "Dst", 10);
        let src = gate.string_to_key("Src", FOO);
        let dst = gate.string_to_key("Dst", FOO);
        assert_eq!(gate.try_remap(src, 1), Some((dst, 11)));
        gate.clear_store(false).unwrap();
        assert_eq!(gate.try_remap(src, 1), None);
    }

    #[test]
    fn arena_reset_after_proxies_on_clear() {
        let gate = gate();
        let cached = gate.alloc(vec![1u32, 2, 3]);
        assert!(cached.get().is_some());
        gate.clear_store(false).unwrap();
        assert!(cached.get().is_none());
        assert_eq!(gate.arena().report().resets, 1);
    }

    #[test]
    fn slot_switch_changes_arena() {
        let arenas = Arc::new(stash_arena::ArenaHeader::new("evt"));
        let gate = gate().with_arena_header(Arc::clone(&arenas)).unwrap();
        let slot0 = gate.alloc(0u8);
        gate.set_slot_number(SlotId::new(1), 2).unwrap();
        assert_eq!(gate.arena().name(), "evt_1");
        gate.clear_store(true).unwrap();
        // Only slot 1 was reset.
        assert!(slot0.get().is_some());
        let _current = gate.make_current();
        assert_eq!(stash_arena::current_arena().unwrap().name(), "evt_1");
    }

    #[test]
    fn capability_traits_accept_gate() {
        fn count_valid(dict: &dyn ProxyDict) -> usize {
            dict.proxies()
                .unwrap()
                .iter()
                .filter(|p| p.is_valid())
                .count()
        }
        let gate = gate();
        gate.record(Jet(1), "A").unwrap();
        gate.record_address(Address::new(FOO, "Lazy", "x"), None, false)
            .unwrap();
        assert_eq!(count_valid(&gate), 1);
    }

    // -----------------------------------------------------------------------
    // 12. Versions, overwrite, slots, clears racing conversions
    // -----------------------------------------------------------------------
    #[test]
    fn versioned_record_keeps_earlier_object() {
        let gate = gate();
        let v0 = object(0);
        let v1 = object(1);
        gate.record_object(v0.clone(), FOO, "Tracks", RecordOptions::default())
            .unwrap();
        let proxy = gate
            .record_object(v1.clone(), FOO, ";01;Tracks", RecordOptions::default())
            .unwrap();
        assert_eq!(proxy.name(), ";01;Tracks");
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Tracks").unwrap(), &v1));
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, ";01;Tracks").unwrap(), &v1));
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, ";00;Tracks").unwrap(), &v0));
    }

    #[test]
    fn auto_version_follows_latest() {
        let gate = gate();
        let auto = VersionedKey::auto("Tracks").unwrap().raw();
        let objects: Vec<DataObject> = (0..3).map(object).collect();
        let names: Vec<String> = objects
            .iter()
            .map(|o| {
                gate.record_object(o.clone(), FOO, &auto, RecordOptions::default())
                    .unwrap()
                    .name()
            })
            .collect();
        assert_eq!(names, vec![";00;Tracks", ";01;Tracks", ";02;Tracks"]);
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Tracks").unwrap(), &objects[2]));
        for (name, obj) in names.iter().zip(&objects) {
            assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, name).unwrap(), obj));
        }
        // Only the latest version carries the plain name.
        let holders = gate
            .proxies()
            .unwrap()
            .iter()
            .filter(|p| p.has_alias("Tracks"))
            .count();
        assert_eq!(holders, 1);
    }

    #[test]
    fn malformed_versioned_key_rejected() {
        let gate = gate();
        let err = gate
            .record_object(object(1), FOO, ";1;Tracks", RecordOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(gate.proxies().unwrap().is_empty());
    }

    #[test]
    fn overwrite_replaces_proxy() {
        let gate = gate();
        gate.record(Jet(1), "J").unwrap();
        let old = gate.proxy(Jet::CLID, "J").unwrap().unwrap();
        let second = gate.overwrite(Jet(2), "J").unwrap();
        assert_eq!(old.state(), ProxyState::Destroyed);
        assert!(Arc::ptr_eq(&gate.retrieve::<Jet>("J").unwrap(), &second));

        let current = gate.proxy(Jet::CLID, "J").unwrap().unwrap();
        assert!(!current.is_reset_only());
        gate.clear_store(false).unwrap();
        assert_eq!(current.state(), ProxyState::Destroyed);
        assert!(gate.proxy(Jet::CLID, "J").unwrap().is_none());
    }

    #[test]
    fn overwrite_of_empty_key_records() {
        let gate = gate();
        let jet = gate.overwrite(Jet(7), "Fresh").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve::<Jet>("Fresh").unwrap(), &jet));
    }

    #[test]
    fn overwrite_with_owned_object_changes_nothing() {
        let gate = gate();
        let a = object(1);
        let b = object(2);
        gate.record_object(a.clone(), FOO, "A", RecordOptions::default())
            .unwrap();
        gate.record_object(b.clone(), FOO, "B", RecordOptions::default())
            .unwrap();
        let err = gate.overwrite_object(b, FOO, "A", true).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateObject { .. }));
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "A").unwrap(), &a));
    }

    #[test]
    fn proxy_range_lists_keys_and_aliases() {
        let gate = gate();
        let a = gate
            .record_object(object(1), FOO, "A", RecordOptions::default())
            .unwrap();
        let b = gate
            .record_object(object(2), FOO, "B", RecordOptions::default())
            .unwrap();
        gate.set_alias(FOO, "A", "Alpha").unwrap();
        gate.record(Track(1), "T").unwrap();

        let range: Vec<_> = gate
            .proxy_range(FOO)
            .unwrap()
            .into_iter()
            .map(|(key, proxy)| (key, proxy.id()))
            .collect();
        assert_eq!(
            range,
            vec![
                ("A".to_string(), a.id()),
                ("Alpha".to_string(), a.id()),
                ("B".to_string(), b.id()),
            ]
        );
        assert!(gate.proxy_range(Clid::new(99)).unwrap().is_empty());
    }

    #[test]
    fn const_flag_does_not_outlive_unit_of_work() {
        let gate = gate();
        let locked = RecordOptions {
            allow_mods: false,
            ..RecordOptions::default()
        };
        let proxy = gate.record_object(object(1), FOO, "Foo", locked).unwrap();
        assert!(proxy.is_const());
        gate.clear_store(false).unwrap();

        let again = gate
            .record_object(object(2), FOO, "Foo", RecordOptions::default())
            .unwrap();
        assert_eq!(again.id(), proxy.id());
        assert!(!again.is_const());
    }

    #[test]
    fn renames_apply_to_links_swaps_and_release() {
        let gate = gate();
        let x = object(1);
        let y = object(2);
        gate.record_object(x.clone(), FOO, "New", RecordOptions::default())
            .unwrap();
        gate.record_object(y.clone(), FOO, "Other", RecordOptions::default())
            .unwrap();
        gate.add_rename(FOO, "Old", "New");

        assert!(gate.transient_contains(FOO, "Old").unwrap());
        gate.sym_link(FOO, "Old", BASE).unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(BASE, "New").unwrap(), &x));
        gate.set_alias(FOO, "Old", "Alias").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "Alias").unwrap(), &x));

        gate.transient_swap(FOO, "Old", "Other").unwrap();
        assert!(Arc::ptr_eq(&gate.retrieve_object(FOO, "New").unwrap(), &y));
        let released = gate.release_object(FOO, "Old").unwrap().unwrap();
        assert!(Arc::ptr_eq(&released, &y));
        assert!(!gate.transient_contains(FOO, "New").unwrap());
    }

    #[test]
    fn wrong_type_names_renamed_key() {
        let gate = gate();
        gate.record(Jet(1), "NewJets").unwrap();
        gate.add_rename(Jet::CLID, "OldJets", "NewJets");
        match gate.retrieve_as::<Track>(Jet::CLID, "OldJets").unwrap_err() {
            StoreError::WrongType { clid, key, .. } => {
                assert_eq!(clid, Jet::CLID);
                assert_eq!(key, "NewJets");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn slot_out_of_range_is_rejected() {
        let gate = gate();
        let err = gate.set_slot_number(SlotId::new(2), 2).unwrap_err();
        assert!(matches!(err, StoreError::SlotOutOfRange { .. }));
        assert_eq!(gate.slot(), SlotId::SERIAL);
        assert_eq!(gate.num_slots(), 1);
        assert!(gate.set_slot_number(SlotId::new(0), 0).is_err());

        gate.set_slot_number(SlotId::new(1), 2).unwrap();
        let arenas = Arc::new(stash_arena::ArenaHeader::new("evt"));
        let gate = gate.with_arena_header(Arc::clone(&arenas)).unwrap();
        assert_eq!(gate.arena().name(), "evt_1");
        assert_eq!(arenas.len(), 2);
    }

    #[test]
    fn configured_slot_out_of_range_uses_serial_slot() {
        let gate = StoreGate::new(StoreConfig {
            slot: 3,
            num_slots: 2,
            ..StoreConfig::default()
        });
        assert_eq!(gate.slot(), SlotId::SERIAL);
        assert_eq!(gate.arena().slot(), SlotId::SERIAL);
    }

    #[test]
    fn clear_during_conversion_drops_stale_object() {
        let gate = Arc::new(gate());
        gate.set_slot_number(SlotId::new(1), 2).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let converter = counting_converter(Arc::clone(&calls), Duration::from_millis(100));
        let proxy = gate
            .record_address(Address::new(FOO, "Slow", "blk:1"), Some(converter), false)
            .unwrap();

        let reader = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.retrieve_object(FOO, "Slow"))
        };
        while proxy.state() != ProxyState::Materializing {
            thread::sleep(Duration::from_millis(1));
        }
        gate.clear_store(false).unwrap();

        let err = reader.join().unwrap().unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
        assert_eq!(proxy.state(), ProxyState::Reset);
        assert!(proxy.object().is_none());
        assert!(!gate.contains(FOO, "Slow").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // 13. Properties
    // -----------------------------------------------------------------------
    proptest! {
        #[test]
        fn one_owner_per_object_and_key(
            ops in proptest::collection::vec((1u32..4, 0usize..4, 0usize..5), 1..40)
        ) {
            let gate = StoreGate::new(StoreConfig {
                auto_symlinks: false,
                ..StoreConfig::default()
            });
            let objects: Vec<DataObject> = (0..5u64).map(object).collect();
            let opts = RecordOptions {
                return_existing: true,
                ..RecordOptions::default()
            };
            for (clid, key, obj) in ops {
                let _ = gate.record_object(objects[obj].clone(), Clid::new(clid), &format!("k{key}"), opts);
            }

            let proxies = gate.proxies().unwrap();
            for obj in &objects {
                let owners = proxies
                    .iter()
                    .filter(|p| p.object().is_some_and(|o| Arc::ptr_eq(&o, obj)))
                    .count();
                prop_assert!(owners <= 1);
            }
            for proxy in &proxies {
                let own = proxy.object().unwrap();
                for clid in proxy.transient_ids() {
                    let found = gate.retrieve_object(clid, &proxy.name()).unwrap();
                    prop_assert!(Arc::ptr_eq(&found, &own));
                }
                for alias in proxy.aliases() {
                    let found = gate.retrieve_object(proxy.clid(), &alias).unwrap();
                    prop_assert!(Arc::ptr_eq(&found, &own));
                }
            }
        }
    }
}
