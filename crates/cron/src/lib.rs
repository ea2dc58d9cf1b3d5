//! Recurring jobs on top of an expiring key-value store.
//!
//! A job is an entry whose TTL is its interval. When the entry leaves the
//! store, the removal notification runs the job and re-inserts it. No
//! background thread of its own is needed; the store's timers drive
//! everything.

pub mod error;
pub mod lock;
pub mod record;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod store_memory;
pub mod types;

pub use {
    error::{Context, Error, Result},
    lock::{ExclusivityLock, LeaseHandle, LeaseTable, NoopLock},
    record::{JobRecord, WorkFn},
    recovery::{HttpRecovery, NoRecovery, RecoverySignal},
    scheduler::{JobSpec, JobStore, Scheduler},
    store::{ExpiringStore, OnRemoved, Priority, RemovalReason},
    store_memory::MemoryStore,
    types::{JobPhase, JobSnapshot, SchedulerStatus},
};
