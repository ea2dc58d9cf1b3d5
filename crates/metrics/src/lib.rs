//! Metric names for tickwork, plus the `metrics` facade macros.
//!
//! Nothing is recorded until the host installs a recorder; the macros are
//! cheap no-ops otherwise.
//!
//! ```rust,ignore
//! use tickwork_metrics::{counter, labels, scheduler};
//!
//! counter!(scheduler::TICKS_TOTAL, labels::REASON => "expired").increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
