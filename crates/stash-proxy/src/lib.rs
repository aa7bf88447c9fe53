//! Data proxies for the Stash transient object store.
//!
//! A [`DataProxy`] is the unit of indirection between a (class id, key)
//! slot in the store and the object recorded there. It either holds the
//! object directly, or an [`Address`] from which an external [`Converter`]
//! builds the object on first access.
//!
//! # Proxy states
//!
//! ```text
//! AddressOnly ──access──▶ Materializing ──ok──▶ Valid ──reset──▶ Reset
//!      ▲                        │                 │                │
//!      └───────conversion error─┘                 └──destroy──▶ Destroyed
//! ```
//!
//! # Design Rules
//!
//! 1. A proxy owns at most one object. Symlinks and aliases are
//!    bookkeeping on the proxy, never additional owners.
//! 2. Materialization runs outside every store lock. The proxy's own state
//!    makes concurrent callers wait for the first conversion.
//! 3. Resetting or destroying a proxy invalidates every bound
//!    [`ResetToken`] in one pass.

pub mod error;
pub mod handle;
pub mod object;
pub mod proxy;

pub use error::{ConvertError, ProxyError, ProxyResult};
pub use handle::ResetToken;
pub use object::{object_addr, Address, Converter, DataObject, ObjectAddr};
pub use proxy::{DataProxy, ProxyId, ProxyState};
