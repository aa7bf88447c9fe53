use stash_proxy::DataProxy;
use stash_store::DataStore;

use crate::capability::SlotManagement;
use crate::error::StoreResult;
use crate::gate::StoreGate;

fn flags(proxy: &DataProxy) -> String {
    format!(
        "({:>7}, {:>8}, {:>6})",
        if proxy.is_valid() { "valid" } else { "INVALID" },
        if proxy.is_const() { "locked" } else { "UNLOCKED" },
        if proxy.is_reset_only() { "reset" } else { "DELETE" },
    )
}

impl StoreGate {
    /// Human-readable listing of every entry, grouped by class id.
    pub fn dump(&self) -> StoreResult<String> {
        let store = self.lock()?;
        Ok(self.dump_locked(&store))
    }

    pub(crate) fn dump_locked(&self, store: &DataStore) -> String {
        let mut lines = vec![format!(
            "===== {} ({}) {}: {} proxies =====",
            self.config.name,
            self.config.kind,
            self.slot(),
            store.len()
        )];
        for clid in store.clids() {
            let entries = store.proxies_of(clid);
            let type_name = self
                .types
                .type_name(clid)
                .unwrap_or_else(|| "<unknown>".into());
            lines.push(format!("clid {clid} ({type_name}): {} entries", entries.len()));
            for (key, proxy) in entries {
                let target = proxy.name();
                let alias = if key != target {
                    format!(" -> {target}")
                } else {
                    String::new()
                };
                lines.push(format!(
                    "  flags: {} --- {:?} --- {} --- key: {key}{alias}",
                    flags(&proxy),
                    proxy.state(),
                    proxy.id()
                ));
            }
        }
        lines.join("\n")
    }
}
