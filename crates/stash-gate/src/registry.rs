use std::any::Any;
use std::collections::HashMap;
use std::sync::RwLock;

use stash_types::Clid;

/// A Rust type that can be recorded in the store under a fixed class id.
pub trait StoreType: Any + Send + Sync {
    const CLID: Clid;
}

/// Maps class ids to diagnostic names and base class ids.
///
/// Names are used for dumps and logs only. Bases drive automatic symlinks.
pub trait TypeRegistry: Send + Sync {
    fn type_name(&self, clid: Clid) -> Option<String>;

    /// Class ids a recorded object of type `clid` should also be reachable
    /// under.
    fn bases(&self, _clid: Clid) -> Vec<Clid> {
        Vec::new()
    }
}

/// Registry that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTypes;

impl TypeRegistry for NoTypes {
    fn type_name(&self, _clid: Clid) -> Option<String> {
        None
    }
}

#[derive(Clone, Debug)]
struct TypeInfo {
    name: String,
    bases: Vec<Clid>,
}

/// In-memory [`TypeRegistry`] filled at startup.
#[derive(Debug, Default)]
pub struct StaticTypeRegistry {
    types: RwLock<HashMap<Clid, TypeInfo>>,
}

impl StaticTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a type.
    pub fn register(&self, clid: Clid, name: impl Into<String>, bases: &[Clid]) {
        let info = TypeInfo {
            name: name.into(),
            bases: bases.iter().copied().filter(|b| *b != clid).collect(),
        };
        self.types
            .write()
            .expect("type registry lock poisoned")
            .insert(clid, info);
    }

    pub fn len(&self) -> usize {
        self.types.read().expect("type registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeRegistry for StaticTypeRegistry {
    fn type_name(&self, clid: Clid) -> Option<String> {
        self.types
            .read()
            .expect("type registry lock poisoned")
            .get(&clid)
            .map(|info| info.name.clone())
    }

    fn bases(&self, clid: Clid) -> Vec<Clid> {
        self.types
            .read()
            .expect("type registry lock poisoned")
            .get(&clid)
            .map(|info| info.bases.clone())
            .unwrap_or_default()
    }
}
