//! Exclusivity lock handles carried by job records.
//!
//! The scheduler never acquires or releases these around an invocation. It
//! only keeps the handle alive while the job exists and detaches it once the
//! job stops. Whatever exclusivity the handle provides is up to the
//! implementation.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::debug;

use crate::{Error, Result};

/// An attached lock handle.
///
/// `detach` must be safe to call more than once; only the first call has an
/// effect.
pub trait ExclusivityLock: Send + Sync + fmt::Debug {
    fn detach(&self);

    /// Short label used in logs.
    fn kind(&self) -> &'static str;
}

/// Lock that provides no exclusivity at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

impl ExclusivityLock for NoopLock {
    fn detach(&self) {}

    fn kind(&self) -> &'static str {
        "noop"
    }
}

/// In-process table of named leases.
///
/// A name can be attached by one holder at a time. Two schedulers sharing a
/// table cannot both hold a lease for the same job, which keeps a job from
/// being registered twice within one process.
#[derive(Debug, Default, Clone)]
pub struct LeaseTable {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LeaseTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `name`, failing with [`Error::LockHeld`] if another
    /// handle already holds it.
    pub fn attach(&self, name: &str) -> Result<LeaseHandle> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(name.to_string()) {
            return Err(Error::lock_held(name));
        }
        debug!(lease = name, "lease attached");
        Ok(LeaseHandle {
            name: name.to_string(),
            table: Arc::clone(&self.held),
            released: AtomicBool::new(false),
        })
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

/// A lease obtained from a [`LeaseTable`]. Released on `detach` or drop.
pub struct LeaseHandle {
    name: String,
    table: Arc<Mutex<HashSet<String>>>,
    released: AtomicBool,
}

impl LeaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("name", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}

impl ExclusivityLock for LeaseHandle {
    fn detach(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
        debug!(lease = %self.name, "lease detached");
    }

    fn kind(&self) -> &'static str {
        "lease"
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attach_fails_until_detached() {
        let table = LeaseTable::new();
        let first = table.attach("reports").unwrap();
        assert!(table.is_held("reports"));

        let err = table.attach("reports").unwrap_err();
        assert!(matches!(err, Error::LockHeld { ref name } if name == "reports"));

        first.detach();
        assert!(!table.is_held("reports"));
        assert!(table.attach("reports").is_ok());
    }

    #[test]
    fn detach_is_idempotent() {
        let table = LeaseTable::new();
        let handle = table.attach("a").unwrap();
        handle.detach();
        // Someone else takes the name; a repeated detach must not free it.
        let other = table.attach("a").unwrap();
        handle.detach();
        assert!(table.is_held("a"));
        assert!(!other.is_released());
    }

    #[test]
    fn drop_releases_lease() {
        let table = LeaseTable::new();
        {
            let _handle = table.attach("a").unwrap();
            assert!(table.is_held("a"));
        }
        assert!(!table.is_held("a"));
    }

    #[test]
    fn noop_lock_kind() {
        let lock = NoopLock;
        lock.detach();
        assert_eq!(lock.kind(), "noop");
    }
}
