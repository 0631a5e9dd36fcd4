//! Short-lived cache for discovered service metadata.
//!
//! Nothing in the detectors or the CLI reads it: the cache belongs to the
//! orchestration layer that discovers services and fetches their profiles
//! before handing them to the detectors. That layer owns one instance and
//! passes it to its workers. Values are cloned on the way in and on the way
//! out, so callers never hold a reference into the shared map.
//!
//! ```
//! use goprof::cache::{ServiceCache, ServiceMetadata};
//! use goprof::findings::ProfileKind;
//! use std::time::Duration;
//!
//! let cache = ServiceCache::new(Duration::from_secs(30));
//! cache.set(
//!     "checkout".to_string(),
//!     ServiceMetadata {
//!         name: "checkout".to_string(),
//!         endpoint: "http://checkout:6060/debug/pprof".to_string(),
//!         profile_kinds: vec![ProfileKind::Cpu, ProfileKind::Heap],
//!         labels: Default::default(),
//!     },
//! );
//!
//! let found = cache.get(&"checkout".to_string());
//! assert_eq!(found.map(|m| m.profile_kinds.len()), Some(2));
//! ```

use crate::findings::ProfileKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// What discovery learned about a profiled service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub profile_kinds: Vec<ProfileKind>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

pub type ServiceCache = MetadataCache<String, ServiceMetadata>;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Read-mostly map whose entries expire `ttl` after they were set.
pub struct MetadataCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash, V: Clone> MetadataCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A copy of the live value for `key`. Expired entries read as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        // A writer that panicked cannot leave the map half-updated, so a
        // poisoned lock is still safe to read.
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = entries.len(), "purged expired metadata");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn service(name: &str) -> ServiceMetadata {
        ServiceMetadata {
            name: name.to_string(),
            endpoint: format!("http://{}:6060/debug/pprof", name),
            profile_kinds: vec![ProfileKind::Cpu, ProfileKind::Heap],
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn get_returns_a_copy() {
        let cache = ServiceCache::new(Duration::from_secs(60));
        cache.set("api".to_string(), service("api"));

        let mut copy = cache.get(&"api".to_string()).unwrap();
        copy.labels.insert("mutated".to_string(), "yes".to_string());

        assert!(cache.get(&"api".to_string()).unwrap().labels.is_empty());
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = ServiceCache::new(Duration::ZERO);
        cache.set("api".to_string(), service("api"));

        assert_eq!(cache.get(&"api".to_string()), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.set(1, "one");
        cache.set(2, "two");
        assert_eq!(cache.get(&2), Some("two"));
        cache.clear();
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn shared_across_threads() {
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.set(i, i * 10))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn survives_a_poisoned_lock() {
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(60)));
        cache.set("k", 1);

        let poisoner = Arc::clone(&cache);
        let _ = thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(cache.entries.is_poisoned());
        assert_eq!(cache.get(&"k"), Some(1));
        cache.set("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
    }
}
