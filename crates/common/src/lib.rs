//! Shared helpers used across all tickwork crates.

pub mod error;

pub use error::FromMessage;
