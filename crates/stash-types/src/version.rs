//! Versioned keys.
//!
//! A versioned key has the form `;NN;base`, where `NN` is a decimal version
//! of at least two digits. Recording under a versioned key keeps earlier
//! versions reachable under their own versioned names while the plain
//! `base` name always reaches the most recently recorded version. Version
//! [`VersionedKey::AUTO`] asks the store to pick one past the latest.

use std::fmt;

use crate::error::TypeError;
use crate::names::validate_key;

const SEPARATOR: char = ';';

/// A key name paired with a version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VersionedKey {
    base: String,
    version: u8,
}

impl VersionedKey {
    /// Version requesting automatic numbering.
    pub const AUTO: u8 = u8::MAX;

    pub fn new(base: impl Into<String>, version: u8) -> Result<Self, TypeError> {
        let base = base.into();
        validate_key(&base)?;
        Ok(Self { base, version })
    }

    /// A key asking for the next free version of `base`.
    pub fn auto(base: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(base, Self::AUTO)
    }

    /// `true` if `raw` uses the versioned form. Does not validate it.
    pub fn is_versioned(raw: &str) -> bool {
        raw.starts_with(SEPARATOR)
    }

    /// Parse `raw`. Returns `Ok(None)` for a plain key.
    pub fn parse(raw: &str) -> Result<Option<Self>, TypeError> {
        let Some(rest) = raw.strip_prefix(SEPARATOR) else {
            return Ok(None);
        };
        let invalid = |reason: &str| TypeError::InvalidKeyName {
            name: raw.to_string(),
            reason: reason.to_string(),
        };
        let (version, base) = rest
            .split_once(SEPARATOR)
            .ok_or_else(|| invalid("versioned key needs the form ;NN;name"))?;
        if version.len() < 2 || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("version must be at least two decimal digits"));
        }
        let version: u8 = version
            .parse()
            .map_err(|_| invalid("version out of range"))?;
        Self::new(base, version).map(Some)
    }

    /// The versioned form of `raw`: itself if already versioned, else
    /// version 0 of the plain name.
    pub fn of(raw: &str) -> Result<Self, TypeError> {
        match Self::parse(raw)? {
            Some(versioned) => Ok(versioned),
            None => Self::new(raw, 0),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_auto(&self) -> bool {
        self.version == Self::AUTO
    }

    /// The following version, or `None` once the numbering is exhausted.
    pub fn next(&self) -> Option<Self> {
        let version = self.version.checked_add(1).filter(|v| *v != Self::AUTO)?;
        Some(Self {
            base: self.base.clone(),
            version,
        })
    }

    /// The `;NN;base` spelling.
    pub fn raw(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SEPARATOR}{:02}{SEPARATOR}{}", self.version, self.base)
    }
}

/// Validate a key that may be given in versioned form.
pub fn validate_record_key(raw: &str) -> Result<(), TypeError> {
    match VersionedKey::parse(raw)? {
        Some(_) => Ok(()),
        None => validate_key(raw),
    }
}
