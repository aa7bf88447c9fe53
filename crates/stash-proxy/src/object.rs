use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stash_types::Clid;

use crate::error::ConvertError;

/// A live object held by the store.
///
/// The owning proxy holds the store's reference; clients receive clones
/// and downcast them to the concrete type.
pub type DataObject = Arc<dyn Any + Send + Sync>;

/// Identity of a live object: the address of its allocation.
///
/// Used by the reverse object→proxy map. Two `DataObject`s share an
/// `ObjectAddr` exactly when they point to the same allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectAddr(usize);

impl ObjectAddr {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjectAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectAddr({:#x})", self.0)
    }
}

impl fmt::Display for ObjectAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identity of a live object.
pub fn object_addr(object: &DataObject) -> ObjectAddr {
    ObjectAddr(Arc::as_ptr(object) as *const () as usize)
}

/// Opaque reference to an object that has not been read yet.
///
/// The store never interprets `locator`; only the converter that created
/// the address knows what it means (a file offset, a token, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Class id of the object the address resolves to.
    pub clid: Clid,
    /// Transient key the object is published under.
    pub key: String,
    /// Backend-specific locator.
    pub locator: String,
}

impl Address {
    pub fn new(clid: Clid, key: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            clid,
            key: key.into(),
            locator: locator.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.clid, self.key, self.locator)
    }
}

/// Builds live objects from addresses.
///
/// Invoked at most once per proxy between resets. May block on I/O; the
/// store never calls it while holding a lock.
pub trait Converter: Send + Sync {
    fn materialize(&self, address: &Address) -> Result<DataObject, ConvertError>;
}

impl<F> Converter for F
where
    F: Fn(&Address) -> Result<DataObject, ConvertError> + Send + Sync,
{
    fn materialize(&self, address: &Address) -> Result<DataObject, ConvertError> {
        self(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let a: DataObject = Arc::new(5u32);
        let b = a.clone();
        assert_eq!(object_addr(&a), object_addr(&b));
    }

    #[test]
    fn distinct_objects_differ() {
        let a: DataObject = Arc::new(5u32);
        let b: DataObject = Arc::new(5u32);
        assert_ne!(object_addr(&a), object_addr(&b));
    }

    #[test]
    fn closures_are_converters() {
        let conv = |addr: &Address| -> Result<DataObject, ConvertError> {
            Ok(Arc::new(addr.locator.clone()))
        };
        let obj = conv
            .materialize(&Address::new(Clid::new(1), "k", "file:12"))
            .unwrap();
        assert_eq!(obj.downcast_ref::<String>().unwrap(), "file:12");
    }

    #[test]
    fn address_display_and_serde() {
        let addr = Address::new(Clid::new(3), "Tracks", "pool:7");
        assert_eq!(addr.to_string(), "3/Tracks@pool:7");
        let json = serde_json::to_string(&addr).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
