use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid key width: value {value:#x} exceeds {bits} bits")]
    KeyOutOfRange { value: u32, bits: u32 },

    #[error("invalid key name {name:?}: {reason}")]
    InvalidKeyName { name: String, reason: String },

    #[error("the null class id cannot be used to identify stored data")]
    NullClid,
}
