use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stash_types::StoreKind;

/// Configuration for one [`StoreGate`](crate::StoreGate).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name used in logs and dumps.
    pub name: String,
    pub kind: StoreKind,
    /// Log the store contents before every clear.
    pub dump_on_clear: bool,
    /// Log arena usage after every clear.
    pub dump_arena: bool,
    /// Execution slot this store serves.
    pub slot: usize,
    /// Total number of parallel slots. More than one enables hard resets.
    pub num_slots: usize,
    /// Symlink recorded objects to every base class id the type registry
    /// reports.
    pub auto_symlinks: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "StoreGate".into(),
            kind: StoreKind::Event,
            dump_on_clear: false,
            dump_arena: false,
            slot: 0,
            num_slots: 1,
            auto_symlinks: true,
        }
    }
}

/// Errors loading a [`StoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl StoreConfig {
    /// Parse and validate a TOML document. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.num_slots == 0 {
            return Err(ConfigError::Invalid("num_slots must be at least 1".into()));
        }
        if self.slot >= self.num_slots {
            return Err(ConfigError::Invalid(format!(
                "slot {} out of range for {} slots",
                self.slot, self.num_slots
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }
        Ok(())
    }
}
