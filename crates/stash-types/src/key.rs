use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Hashed key identifying a (name, [`Clid`](crate::Clid)) pair.
///
/// Only the low [`SgKey::BITS`] bits are used. Two different (name, clid)
/// pairs must never share an `SgKey`; the string pool enforces that.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SgKey(u32);

impl SgKey {
    /// Number of significant bits in a hashed key.
    pub const BITS: u32 = 30;

    /// Mask selecting the significant bits.
    pub const MASK: u32 = (1 << Self::BITS) - 1;

    /// The null key. Never produced by hashing a valid name.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Build a key from a hash value, discarding the high bits.
    pub const fn from_hash(hash: u32) -> Self {
        Self(hash & Self::MASK)
    }

    /// Build a key from a raw value that must already fit in [`SgKey::BITS`].
    pub fn from_raw(raw: u32) -> Result<Self, TypeError> {
        if raw & !Self::MASK != 0 {
            return Err(TypeError::KeyOutOfRange {
                value: raw,
                bits: Self::BITS,
            });
        }
        Ok(Self(raw))
    }

    /// Returns `true` if this is the null key.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Hex representation (8 characters).
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from an 8-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidHex(format!("expected 4 bytes, got {}", bytes.len())))?;
        Self::from_raw(u32::from_be_bytes(arr))
    }
}

impl fmt::Debug for SgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SgKey({})", self.to_hex())
    }
}

impl fmt::Display for SgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
