//! In-process expiring store driven by tokio timers.
//!
//! Each entry owns one timer task. When the timer fires the entry is taken out
//! of the map first and only then is its notification delivered, so a
//! concurrent `remove` and an expiry can never both notify.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::{runtime::Handle, task::JoinHandle},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use tickwork_metrics::{counter, gauge, store as store_metrics};

use crate::{
    Context, Result,
    store::{ExpiringStore, OnRemoved, Priority, RemovalReason},
};

struct Entry<V> {
    value: V,
    priority: Priority,
    on_removed: OnRemoved<V>,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    next_generation: AtomicU64,
    capacity: Option<usize>,
    runtime: Handle,
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values() {
            entry.timer.abort();
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Inner<V> {
    fn take(&self, key: &str) -> Option<Entry<V>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.remove(key);
        #[cfg(feature = "metrics")]
        gauge!(store_metrics::ENTRIES).set(entries.len() as f64);
        entry
    }

    fn expire(&self, key: &str, generation: u64) {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(current) if current.generation == generation => entries.remove(key),
                // Replaced or removed while this timer was waking up.
                _ => None,
            }
        };
        if let Some(entry) = entry {
            debug!(key, "store entry expired");
            (entry.on_removed)(key, entry.value, RemovalReason::Expired);
        }
    }

    /// Pick the oldest evictable entry when inserting `key` would exceed
    /// capacity. Called with the map locked.
    fn eviction_victim(&self, entries: &HashMap<String, Entry<V>>, key: &str) -> Option<String> {
        let capacity = self.capacity?;
        if entries.contains_key(key) || entries.len() < capacity {
            return None;
        }
        let victim = entries
            .iter()
            .filter(|(_, e)| e.priority == Priority::Normal)
            .min_by_key(|(_, e)| e.generation)
            .map(|(k, _)| k.clone());
        if victim.is_none() {
            warn!(
                capacity,
                key, "store over capacity but every entry is protected from eviction"
            );
        }
        victim
    }
}

/// Expiring store backed by a `HashMap` and one tokio timer per entry.
///
/// Cheap to clone; clones share the same entries.
pub struct MemoryStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> MemoryStore<V> {
    /// Create an unbounded store on the current tokio runtime.
    pub fn new() -> Result<Self> {
        Self::with_capacity(None)
    }

    /// Create a store on the current tokio runtime that evicts the oldest
    /// [`Priority::Normal`] entry once `capacity` entries are held.
    pub fn with_capacity(capacity: Option<usize>) -> Result<Self> {
        let runtime = Handle::try_current().context("expiring store needs a tokio runtime")?;
        Ok(Self::with_handle(runtime, capacity))
    }

    /// Create a store whose timers run on `runtime`. Usable from threads that
    /// are not inside a runtime.
    #[must_use]
    pub fn with_handle(runtime: Handle, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                capacity,
                runtime,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every entry as if the hosting process discarded the store.
    ///
    /// Each entry is notified with [`RemovalReason::ExplicitlyRemoved`].
    /// Returns the number of entries removed.
    pub fn teardown(&self) -> usize {
        let drained: Vec<(String, Entry<V>)> = {
            let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.drain().collect()
        };
        #[cfg(feature = "metrics")]
        gauge!(store_metrics::ENTRIES).set(0.0);

        let count = drained.len();
        warn!(count, "tearing down expiring store");
        for (key, entry) in drained {
            entry.timer.abort();
            (entry.on_removed)(&key, entry.value, RemovalReason::ExplicitlyRemoved);
        }
        count
    }
}

impl<V: Clone + Send + Sync + 'static> ExpiringStore<V> for MemoryStore<V> {
    fn insert(
        &self,
        key: &str,
        value: V,
        ttl: Duration,
        priority: Priority,
        on_removed: OnRemoved<V>,
    ) -> Result<()> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let evicted = {
            let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());

            // Spawned under the lock so the timer cannot look for the entry
            // before it is in the map.
            let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
            let timer_key = key.to_string();
            let timer = self.inner.runtime.spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire(&timer_key, generation);
                }
            });

            let evicted = self
                .inner
                .eviction_victim(&entries, key)
                .and_then(|victim| entries.remove(&victim).map(|e| (victim, e)));

            if let Some(replaced) = entries.insert(key.to_string(), Entry {
                value,
                priority,
                on_removed,
                generation,
                timer,
            }) {
                replaced.timer.abort();
            }
            #[cfg(feature = "metrics")]
            gauge!(store_metrics::ENTRIES).set(entries.len() as f64);
            evicted
        };

        if let Some((victim_key, victim)) = evicted {
            debug!(key = %victim_key, "evicting store entry for capacity");
            #[cfg(feature = "metrics")]
            counter!(store_metrics::EVICTIONS_TOTAL).increment(1);
            victim.timer.abort();
            (victim.on_removed)(
                &victim_key,
                victim.value,
                RemovalReason::EvictedForCapacity,
            );
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Option<V> {
        let entry = self.inner.take(key)?;
        entry.timer.abort();
        let value = entry.value.clone();
        (entry.on_removed)(key, entry.value, RemovalReason::ExplicitlyRemoved);
        Some(value)
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.value.clone())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<(String, u32, RemovalReason)>>>;

    fn recorder(log: &Log) -> OnRemoved<u32> {
        let log = Arc::clone(log);
        Arc::new(move |key: &str, value: u32, reason: RemovalReason| {
            log.lock().unwrap().push((key.to_string(), value, reason));
        })
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_notifies_once_after_ttl() {
        let store = MemoryStore::new().unwrap();
        let log = Log::default();
        store
            .insert("a", 1, Duration::from_secs(5), Priority::Normal, recorder(&log))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(store.lookup("a"), Some(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), &[("a".to_string(), 1, RemovalReason::Expired)]);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_notifies_and_cancels_timer() {
        let store = MemoryStore::new().unwrap();
        let log = Log::default();
        store
            .insert("a", 7, Duration::from_secs(1), Priority::Normal, recorder(&log))
            .unwrap();

        assert_eq!(store.remove("a"), Some(7));
        assert_eq!(store.remove("a"), None);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].2, RemovalReason::ExplicitlyRemoved);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_is_silent_and_uses_new_ttl() {
        let store = MemoryStore::new().unwrap();
        let log = Log::default();
        store
            .insert("a", 1, Duration::from_secs(1), Priority::Normal, recorder(&log))
            .unwrap();
        store
            .insert("a", 2, Duration::from_secs(10), Priority::Normal, recorder(&log))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), &[("a".to_string(), 2, RemovalReason::Expired)]);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest_normal_entry_only() {
        let store = MemoryStore::with_capacity(Some(2)).unwrap();
        let log = Log::default();
        let ttl = Duration::from_secs(60);
        store
            .insert("pinned", 1, ttl, Priority::NotRemovable, recorder(&log))
            .unwrap();
        store
            .insert("old", 2, ttl, Priority::Normal, recorder(&log))
            .unwrap();
        store
            .insert("new", 3, ttl, Priority::Normal, recorder(&log))
            .unwrap();

        assert_eq!(store.keys(), vec!["new".to_string(), "pinned".to_string()]);
        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), &[(
            "old".to_string(),
            2,
            RemovalReason::EvictedForCapacity
        )]);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_overflows_when_everything_is_pinned() {
        let store = MemoryStore::with_capacity(Some(1)).unwrap();
        let log = Log::default();
        let ttl = Duration::from_secs(60);
        store
            .insert("a", 1, ttl, Priority::NotRemovable, recorder(&log))
            .unwrap();
        store
            .insert("b", 2, ttl, Priority::NotRemovable, recorder(&log))
            .unwrap();
        assert_eq!(store.len(), 2);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_removes_everything_as_explicit() {
        let store = MemoryStore::new().unwrap();
        let log = Log::default();
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            store
                .insert(key, i as u32, Duration::from_secs(30), Priority::Normal, recorder(&log))
                .unwrap();
        }

        assert_eq!(store.teardown(), 3);
        assert!(store.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(
            log.iter()
                .all(|(_, _, reason)| *reason == RemovalReason::ExplicitlyRemoved)
        );
    }

    #[test]
    fn new_outside_runtime_is_an_error() {
        assert!(MemoryStore::<u32>::new().is_err());
    }
}
