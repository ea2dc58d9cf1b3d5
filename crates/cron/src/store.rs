//! The expiring key-value store contract the scheduler runs on.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    /// The entry's time-to-live elapsed.
    Expired,
    /// Someone called `remove`, or the host discarded the store.
    ExplicitlyRemoved,
    /// Dropped to make room for newer entries.
    EvictedForCapacity,
}

impl RemovalReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ExplicitlyRemoved => "explicitly_removed",
            Self::EvictedForCapacity => "evicted_for_capacity",
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Eviction priority hint supplied with each insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    /// Never chosen as a capacity-eviction victim.
    NotRemovable,
}

/// Removal notification: `(key, value, reason)`.
pub type OnRemoved<V> = Arc<dyn Fn(&str, V, RemovalReason) + Send + Sync>;

/// Key-value store with per-entry TTL and removal notifications.
///
/// `on_removed` fires exactly once for every insertion that is later removed,
/// whatever the reason. Overwriting a key with a fresh insertion replaces the
/// old entry silently.
pub trait ExpiringStore<V>: Send + Sync {
    fn insert(
        &self,
        key: &str,
        value: V,
        ttl: Duration,
        priority: Priority,
        on_removed: OnRemoved<V>,
    ) -> Result<()>;

    /// Remove `key`, firing its notification with
    /// [`RemovalReason::ExplicitlyRemoved`].
    fn remove(&self, key: &str) -> Option<V>;

    fn lookup(&self, key: &str) -> Option<V>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_labels() {
        assert_eq!(RemovalReason::Expired.to_string(), "expired");
        assert_eq!(
            RemovalReason::EvictedForCapacity.as_str(),
            "evicted_for_capacity"
        );
        assert_eq!(
            serde_json::to_string(&RemovalReason::ExplicitlyRemoved).unwrap_or_default(),
            "\"explicitlyRemoved\""
        );
    }

    #[test]
    fn default_priority_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
