//! Configuration loading, validation, and env substitution.
//!
//! Config files: `tickwork.toml`, `tickwork.yaml`, or `tickwork.json`
//! Searched in `./` then `~/.config/tickwork/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, load_config, render_toml},
    schema::{RecoveryConfig, SchedulerConfig, StoreConfig, TickworkConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
