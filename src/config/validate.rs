// src/config/validate.rs

use crate::config::model::{ControllerConfig, RawControllerConfig};
use crate::errors::{Result, TccError};

impl TryFrom<RawControllerConfig> for ControllerConfig {
    type Error = TccError;

    fn try_from(raw: RawControllerConfig) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ControllerConfig::new_unchecked(raw.pool, raw.logging))
    }
}

/// Check the invariants a [`ControllerConfig`] guarantees.
pub fn validate_config(cfg: &RawControllerConfig) -> Result<()> {
    validate_pool(cfg)?;
    Ok(())
}

fn validate_pool(cfg: &RawControllerConfig) -> Result<()> {
    if cfg.pool.capacity == 0 {
        return Err(TccError::ConfigError(
            "[pool].capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let raw: RawControllerConfig = toml::from_str("[pool]\ncapacity = 0\n").unwrap();
        let err = ControllerConfig::try_from(raw).unwrap_err();
        assert!(matches!(err, TccError::ConfigError(msg) if msg.contains("capacity")));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.pool().capacity, 4);
        assert_eq!(cfg.logging().level, None);
    }
}
