//! Persisted operator flags for the store tier.
//!
//! When no embedded-store driver works, the engine writes `disabled = true` to
//! `store.toml` under the cache root. The store then stays off across restarts
//! until an operator flips the flag back (`sectio enable-store`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::fs::write_atomic;

pub const FLAG_FILE_NAME: &str = "store.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFlags {
    pub disabled: bool,
    /// Why the store was disabled, for operators reading the file.
    pub reason: Option<String>,
    /// Unix timestamp of the last change.
    pub changed_at: Option<i64>,
}

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("failed to access store flags: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse store flags: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize store flags: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub fn flag_path(root: &Path) -> PathBuf {
    root.join(FLAG_FILE_NAME)
}

impl StoreFlags {
    /// Load flags from the cache root; a missing file means "enabled".
    pub fn load(root: &Path) -> Result<Self, FlagError> {
        match fs::read_to_string(flag_path(root)) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, root: &Path) -> Result<(), FlagError> {
        let raw = toml::to_string(self)?;
        write_atomic(&flag_path(root), raw.as_bytes())?;
        Ok(())
    }

    pub fn disable(root: &Path, reason: impl Into<String>) -> Result<Self, FlagError> {
        let flags = Self {
            disabled: true,
            reason: Some(reason.into()),
            changed_at: Some(OffsetDateTime::now_utc().unix_timestamp()),
        };
        flags.save(root)?;
        Ok(flags)
    }

    pub fn enable(root: &Path) -> Result<Self, FlagError> {
        let flags = Self {
            disabled: false,
            reason: None,
            changed_at: Some(OffsetDateTime::now_utc().unix_timestamp()),
        };
        flags.save(root)?;
        Ok(flags)
    }
}
