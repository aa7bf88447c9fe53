use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Process-wide identifier for a logical data type.
///
/// A `Clid` is assigned once (usually by a type registry outside the store)
/// and never changes. One stored object may be reachable under several
/// `Clid`s when base-type symlinks are made.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clid(u32);

impl Clid {
    /// The null class id. Never identifies stored data.
    pub const NULL: Self = Self(0);

    /// Wrap a raw numeric class id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Wrap a raw class id, rejecting the null id.
    pub fn checked(raw: u32) -> Result<Self, TypeError> {
        if raw == 0 {
            return Err(TypeError::NullClid);
        }
        Ok(Self(raw))
    }

    /// The raw numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`Clid::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Clid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clid({})", self.0)
    }
}

impl fmt::Display for Clid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Clid {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Kind of store a facade instance serves.
///
/// The kind only affects diagnostics and defaults (for example, only the
/// event store designates its arena as the thread's current arena).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Per-event transient data. Cleared after every unit of work.
    #[default]
    Event,
    /// Long-lived detector description data.
    Detector,
    /// Interval-of-validity keyed conditions data.
    Conditions,
    /// Input/output file metadata.
    Metadata,
    /// Anything else.
    Spare,
}

impl StoreKind {
    /// Conventional lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Event => "event",
            StoreKind::Detector => "detector",
            StoreKind::Conditions => "conditions",
            StoreKind::Metadata => "metadata",
            StoreKind::Spare => "spare",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "event" => Ok(StoreKind::Event),
            "detector" => Ok(StoreKind::Detector),
            "conditions" => Ok(StoreKind::Conditions),
            "metadata" => Ok(StoreKind::Metadata),
            "spare" => Ok(StoreKind::Spare),
            other => Err(format!("unknown store kind: {other}")),
        }
    }
}
