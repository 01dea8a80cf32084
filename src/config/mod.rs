// src/config/mod.rs

//! Configuration loading and validation for tcc.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like a non-zero pool capacity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ControllerConfig, LoggingConfig, PoolConfig, RawControllerConfig};
pub use validate::validate_config;
