// src/config/model.rs

use serde::Deserialize;

use crate::errors::Result;
use crate::types::{LogLevel, SubmitMode};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pool]
/// capacity = 4
/// submit = "block"
///
/// [logging]
/// level = "debug"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawControllerConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[pool]` section, used to build a [`crate::exec::BoundedPool`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of node bodies in flight. Must be >= 1.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// `"block"` (default) or `"reject"` when every slot is taken.
    #[serde(default)]
    pub submit: SubmitMode,
}

fn default_capacity() -> usize {
    4
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            submit: SubmitMode::default(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// When unset, `TCC_LOG` and then `info` apply.
    #[serde(default)]
    pub level: Option<LogLevel>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawControllerConfig>`, so holders can rely
/// on the invariants checked in `validate.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pool: PoolConfig,
    logging: LoggingConfig,
}

impl ControllerConfig {
    pub(crate) fn new_unchecked(pool: PoolConfig, logging: LoggingConfig) -> Self {
        Self { pool, logging }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawControllerConfig = toml::from_str(s)?;
        ControllerConfig::try_from(raw)
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new_unchecked(PoolConfig::default(), LoggingConfig::default())
    }
}
