//! Key name validation.
//!
//! Valid key names:
//! - Must be non-empty
//! - Must not contain control characters
//! - Must not start or end with whitespace
//! - Must not contain `;` (reserved as a version separator by providers)

use crate::error::TypeError;

/// Key used when a lookup is made by type only.
pub const DEFAULT_KEY: &str = "DEFAULT";

/// Validate a key name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use stash_types::names::validate_key;
///
/// assert!(validate_key("Tracks").is_ok());
/// assert!(validate_key("HLT_Tracks_v2").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key(" padded").is_err());
/// ```
pub fn validate_key(name: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidKeyName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("key must not be empty"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("contains a control character"));
    }
    if name.starts_with(char::is_whitespace) || name.ends_with(char::is_whitespace) {
        return Err(invalid("must not start or end with whitespace"));
    }
    if name.contains(';') {
        return Err(invalid("contains reserved character ';'"));
    }
    Ok(())
}
