//! Simulated detector readout used by the `stash` binary.
//!
//! Each slot owns a [`StoreGate`] and an [`EventSource`] provider. Raw hits
//! are registered as addresses and built by [`HitReader`] on first access;
//! tracks are reconstructed from them, recorded, aliased and read back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use stash_arena::{current_arena, ArenaHeader};
use stash_gate::{
    ProviderAccess, ProviderResult, ProxyProvider, SlotManagement, StaticTypeRegistry,
    StoreConfig, StoreGate, StoreType,
};
use stash_pool::StringPool;
use stash_proxy::{Address, ConvertError, Converter, DataObject, DataProxy};
use stash_store::DataStore;
use stash_types::{Clid, SlotId};
use tracing::debug;

pub const COLLECTION_CLID: Clid = Clid::new(1000);
pub const RAW_HITS_KEY: &str = "RawHits";

#[derive(Debug)]
pub struct RawHits(pub Vec<u32>);

impl StoreType for RawHits {
    const CLID: Clid = Clid::new(1001);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Track {
    pub hits: usize,
    pub energy: u64,
}

#[derive(Debug)]
pub struct TrackCollection(pub Vec<Track>);

impl StoreType for TrackCollection {
    const CLID: Clid = Clid::new(1002);
}

pub fn type_registry() -> Arc<StaticTypeRegistry> {
    let types = StaticTypeRegistry::new();
    types.register(COLLECTION_CLID, "Collection", &[]);
    types.register(RawHits::CLID, "RawHits", &[]);
    types.register(TrackCollection::CLID, "TrackCollection", &[COLLECTION_CLID]);
    Arc::new(types)
}

/// Builds raw hits for the event currently being processed on a slot.
#[derive(Debug)]
pub struct HitReader {
    seed: u64,
    hits: usize,
    event: AtomicU64,
    reads: AtomicU64,
}

impl HitReader {
    pub fn new(seed: u64, hits: usize) -> Self {
        Self {
            seed,
            hits,
            event: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    pub fn set_event(&self, event: u64) {
        self.event.store(event, Ordering::Release);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl Converter for HitReader {
    fn materialize(&self, address: &Address) -> Result<DataObject, ConvertError> {
        let event: u64 = address
            .locator
            .strip_prefix("event:")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ConvertError::new(format!("bad locator {:?}", address.locator)))?;
        let mut rng = StdRng::seed_from_u64(self.seed ^ event.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let hits: Vec<u32> = (0..self.hits).map(|_| rng.gen_range(1..1000)).collect();
        self.reads.fetch_add(1, Ordering::Relaxed);
        debug!(event, hits = hits.len(), "raw hits read");
        Ok(Arc::new(RawHits(hits)))
    }
}

/// Provider that registers the raw-hit address for each event.
pub struct EventSource {
    reader: Arc<HitReader>,
}

impl EventSource {
    pub fn new(reader: Arc<HitReader>) -> Self {
        Self { reader }
    }

    fn address(&self) -> Address {
        let event = self.reader.event.load(Ordering::Acquire);
        Address::new(RawHits::CLID, RAW_HITS_KEY, format!("event:{event}"))
    }

    fn fresh_proxy(&self, store: &DataStore) -> Arc<DataProxy> {
        let sgkey = store.pool().to_key(RAW_HITS_KEY, RawHits::CLID);
        let converter: Arc<dyn Converter> = self.reader.clone();
        Arc::new(DataProxy::with_address(
            self.address(),
            sgkey,
            Some(converter),
            true,
        ))
    }
}

impl ProxyProvider for EventSource {
    fn load_proxies(&self, store: &mut DataStore) -> ProviderResult<()> {
        match store.proxy(RawHits::CLID, RAW_HITS_KEY) {
            // Reused from the previous event.
            Some(proxy) => proxy
                .set_address(self.address())
                .map_err(|e| stash_gate::ProviderError::failed(e.to_string())),
            None => {
                let proxy = self.fresh_proxy(store);
                store.add_to_store(RawHits::CLID, proxy)?;
                Ok(())
            }
        }
    }

    fn retrieve_proxy(
        &self,
        clid: Clid,
        key: &str,
        store: &mut DataStore,
    ) -> ProviderResult<Option<Arc<DataProxy>>> {
        if clid != RawHits::CLID || key != RAW_HITS_KEY {
            return Ok(None);
        }
        Ok(Some(self.fresh_proxy(store)))
    }
}

/// Per-event outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event: u64,
    pub slot: usize,
    pub hits: usize,
    pub tracks: usize,
    pub energy: u64,
}

/// A store bound to one slot, with its provider.
pub struct SlotWorker {
    pub gate: StoreGate,
    pub reader: Arc<HitReader>,
}

impl SlotWorker {
    pub fn new(
        config: &StoreConfig,
        slot: usize,
        num_slots: usize,
        pool: Arc<StringPool>,
        arenas: Arc<ArenaHeader>,
        seed: u64,
        hits: usize,
    ) -> anyhow::Result<Self> {
        let config = StoreConfig {
            slot,
            num_slots,
            ..config.clone()
        };
        config.validate()?;
        let gate = StoreGate::new(config)
            .with_pool(pool)
            .with_arena_header(arenas)?
            .with_type_registry(type_registry());
        gate.set_slot_number(SlotId::new(slot), num_slots)?;
        let reader = Arc::new(HitReader::new(seed, hits));
        gate.set_provider(Arc::new(EventSource::new(Arc::clone(&reader))))?;
        Ok(Self { gate, reader })
    }

    /// Run one event. With `clear` unset the store keeps the event's data
    /// until the caller clears it.
    pub fn process(&self, event: u64, clear: bool, force_clear: bool) -> anyhow::Result<EventSummary> {
        let gate = &self.gate;
        self.reader.set_event(event);
        gate.load_event_proxies()?;

        let hits = gate
            .retrieve::<RawHits>(RAW_HITS_KEY)
            .with_context(|| format!("event {event}: reading raw hits"))?;

        let _current = gate.make_current();
        let arena = current_arena().context("no current arena")?;
        let calibrated = arena.alloc(hits.0.iter().map(|h| h % 97).collect::<Vec<u32>>());
        let calibrated = calibrated.get().context("scratch buffer reset mid-event")?;

        let tracks: Vec<Track> = calibrated
            .chunks(4)
            .filter(|chunk| chunk.len() == 4)
            .map(|chunk| Track {
                hits: chunk.len(),
                energy: chunk.iter().map(|&e| u64::from(e)).sum(),
            })
            .collect();
        gate.record(TrackCollection(tracks), "Tracks")?;
        gate.set_alias(TrackCollection::CLID, "Tracks", "BestTracks")?;

        // Reachable under the base collection type through the automatic
        // symlink.
        gate.retrieve_object(COLLECTION_CLID, "Tracks")?;
        let best = gate.retrieve::<TrackCollection>("BestTracks")?;

        let summary = EventSummary {
            event,
            slot: gate.slot().index(),
            hits: hits.0.len(),
            tracks: best.0.len(),
            energy: best.0.iter().map(|t| t.energy).sum(),
        };
        if clear {
            gate.clear_store(force_clear)?;
        }
        Ok(summary)
    }
}
