// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{ControllerConfig, RawControllerConfig};
use crate::errors::Result;

/// Load a configuration file and return the raw, unvalidated model.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] to also
/// check the semantic invariants.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawControllerConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawControllerConfig = toml::from_str(&contents)?;
    debug!(path = %path.display(), "loaded controller config");

    Ok(config)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ControllerConfig> {
    let raw_config = load_from_path(&path)?;
    let config = ControllerConfig::try_from(raw_config)?;
    Ok(config)
}
