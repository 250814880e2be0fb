//! Sharded Multi-Database Store
//!
//! This module implements the core storage layer for Valhaj: a fixed
//! container of logical databases, each partitioned into lock-striped
//! shards. Every command the server supports is a composition of the
//! composite atomic primitives exposed here.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock per database, each database
//!    holds many shards, each with its own `RwLock`. Sessions touching
//!    different keys rarely contend.
//! 2. **Composite Primitives**: Read-modify-write sequences
//!    (`load_exist_store`, `load_modify_store`) run under a single shard
//!    lock, so no caller ever holds a lock across I/O.
//! 3. **Stable Shard Selection**: A key's shard is byte 17 of its SHA-1
//!    digest modulo the shard count. The mapping is deterministic for the
//!    lifetime of the process.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CacheContainer                         │
//! │  ┌─────────────────┐ ┌─────────────────┐ ┌──────────────┐   │
//! │  │  ShardedCache 0 │ │  ShardedCache 1 │ │ ShardedCache │   │
//! │  │ ┌─────┐ ┌─────┐ │ │ ┌─────┐ ┌─────┐ │ │      2       │   │
//! │  │ │shard│…│shard│ │ │ │shard│…│shard│ │ │      …       │   │
//! │  │ └─────┘ └─────┘ │ │ └─────┘ └─────┘ │ │              │   │
//! │  └─────────────────┘ └─────────────────┘ └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `load` and `count` take shared locks; every other primitive takes the
//! exclusive lock of the one shard it touches. `clear` and `range` walk the
//! shards one at a time and are therefore not point-in-time snapshots.

use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A single lock-striped partition of a database.
#[derive(Debug, Default)]
struct Shard {
    map: RwLock<HashMap<String, String>>,
}

/// One logical database: an ordered sequence of shards.
///
/// Designed to be wrapped in an [`Arc`] and shared across session tasks and
/// TTL timers. All primitives are atomic with respect to their shard.
///
/// # Example
///
/// ```
/// use valhaj::storage::ShardedCache;
///
/// let cache = ShardedCache::new(50);
/// cache.store("name", "valhaj");
/// assert_eq!(cache.load("name"), Some("valhaj".to_string()));
/// ```
#[derive(Debug)]
pub struct ShardedCache {
    shards: Vec<Shard>,
}

impl ShardedCache {
    /// Creates a database with `shard_count` empty shards.
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count).map(|_| Shard::default()).collect();
        Self { shards }
    }

    /// Maps a key to its shard. Byte 17 of the SHA-1 digest, modulo the
    /// shard count.
    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let digest = Sha1::digest(key.as_bytes());
        digest[17] as usize % self.shards.len()
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Returns the value stored at `key`, if present. Shared lock.
    pub fn load(&self, key: &str) -> Option<String> {
        let map = self.shard(key).map.read().unwrap();
        map.get(key).cloned()
    }

    /// Unconditionally inserts or overwrites `key`.
    pub fn store(&self, key: &str, value: &str) {
        let mut map = self.shard(key).map.write().unwrap();
        map.insert(key.to_string(), value.to_string());
    }

    /// Removes `key` if present. Absent keys are not an error.
    pub fn delete(&self, key: &str) {
        let mut map = self.shard(key).map.write().unwrap();
        map.remove(key);
    }

    /// Atomically reads and removes `key`, returning the removed value.
    pub fn load_and_delete(&self, key: &str) -> Option<String> {
        let mut map = self.shard(key).map.write().unwrap();
        map.remove(key)
    }

    /// Conditional write under one lock. Writes `value` when the key's
    /// presence matches `want_exists`, or always when `overwrite` is set.
    /// Returns the previous value regardless of whether the write happened.
    ///
    /// This single primitive encodes NX (`want_exists = false`), XX
    /// (`want_exists = true`), unconditional swap (`overwrite = true`) and
    /// conditional copy.
    pub fn load_exist_store(
        &self,
        key: &str,
        value: &str,
        want_exists: bool,
        overwrite: bool,
    ) -> Option<String> {
        let mut map = self.shard(key).map.write().unwrap();
        let old = map.get(key).cloned();
        if old.is_some() == want_exists || overwrite {
            map.insert(key.to_string(), value.to_string());
        }
        old
    }

    /// Read-modify-write under one lock. The current value (or `initial`
    /// when the key is absent) is passed to `modifier`, whose result is
    /// written back unconditionally and returned along with its status.
    pub fn load_modify_store<F>(&self, key: &str, modifier: F, initial: &str) -> (String, bool)
    where
        F: FnOnce(&str) -> (String, bool),
    {
        let mut map = self.shard(key).map.write().unwrap();
        let current = match map.get(key) {
            Some(value) => value.as_str(),
            None => initial,
        };
        let (value, status) = modifier(current);
        map.insert(key.to_string(), value.clone());
        (value, status)
    }

    /// Drops every entry, replacing each shard's map with an empty one.
    /// Shards are cleared one at a time, not under a global lock.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut map = shard.map.write().unwrap();
            *map = HashMap::new();
        }
    }

    /// Returns every entry as an interleaved key/value sequence plus the
    /// pair count. Traversal order is per-shard map order and therefore
    /// unspecified. Locks each shard exclusively in turn.
    pub fn range(&self) -> (Vec<String>, usize) {
        let mut items = Vec::new();
        for shard in &self.shards {
            let map = shard.map.write().unwrap();
            for (key, value) in map.iter() {
                items.push(key.clone());
                items.push(value.clone());
            }
        }
        let total = items.len() / 2;
        (items, total)
    }

    /// Returns the total key count and the per-shard sizes. Shared locks,
    /// taken one shard at a time.
    pub fn count(&self) -> (usize, Vec<usize>) {
        let mut total = 0;
        let mut subtotal = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let size = shard.map.read().unwrap().len();
            total += size;
            subtotal.push(size);
        }
        (total, subtotal)
    }

    /// Number of shards in this database.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// The fixed, ordered set of logical databases inside one server process.
///
/// Created once at startup and never resized. Sessions select a database by
/// index; the same key may exist independently in several databases.
#[derive(Debug)]
pub struct CacheContainer {
    databases: Vec<Arc<ShardedCache>>,
}

impl CacheContainer {
    /// Creates `cache_count` databases of `shard_count` shards each.
    pub fn new(cache_count: usize, shard_count: usize) -> Self {
        let databases = (0..cache_count)
            .map(|_| Arc::new(ShardedCache::new(shard_count)))
            .collect();
        Self { databases }
    }

    /// Returns the database at `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range; callers validate indices at the
    /// command layer, so the range `[0, len)` is total here.
    pub fn database(&self, index: usize) -> &Arc<ShardedCache> {
        &self.databases[index]
    }

    /// Number of logical databases.
    pub fn len(&self) -> usize {
        self.databases.len()
    }

    /// True when the container holds no databases. Never the case for a
    /// running server, but keeps the `len`/`is_empty` pair complete.
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    /// Iterates over the databases in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ShardedCache>> {
        self.databases.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_load() {
        let cache = ShardedCache::new(50);

        cache.store("key", "value");
        assert_eq!(cache.load("key"), Some("value".to_string()));
    }

    #[test]
    fn test_load_missing() {
        let cache = ShardedCache::new(50);
        assert_eq!(cache.load("missing"), None);
    }

    #[test]
    fn test_store_overwrites() {
        let cache = ShardedCache::new(50);

        cache.store("key", "old");
        cache.store("key", "new");
        assert_eq!(cache.load("key"), Some("new".to_string()));
    }

    #[test]
    fn test_delete() {
        let cache = ShardedCache::new(50);

        cache.store("key", "value");
        cache.delete("key");
        assert_eq!(cache.load("key"), None);

        // Deleting an absent key is not an error
        cache.delete("key");
    }

    #[test]
    fn test_load_and_delete() {
        let cache = ShardedCache::new(50);

        cache.store("key", "value");
        assert_eq!(cache.load_and_delete("key"), Some("value".to_string()));
        assert_eq!(cache.load("key"), None);
        assert_eq!(cache.load_and_delete("key"), None);
    }

    #[test]
    fn test_load_exist_store_nx() {
        let cache = ShardedCache::new(50);

        // want_exists = false: writes only when absent
        assert_eq!(cache.load_exist_store("key", "first", false, false), None);
        assert_eq!(cache.load("key"), Some("first".to_string()));

        // Present now, so the second write is refused
        assert_eq!(
            cache.load_exist_store("key", "second", false, false),
            Some("first".to_string())
        );
        assert_eq!(cache.load("key"), Some("first".to_string()));
    }

    #[test]
    fn test_load_exist_store_xx() {
        let cache = ShardedCache::new(50);

        // want_exists = true: absent key is left alone
        assert_eq!(cache.load_exist_store("key", "value", true, false), None);
        assert_eq!(cache.load("key"), None);

        cache.store("key", "old");
        assert_eq!(
            cache.load_exist_store("key", "new", true, false),
            Some("old".to_string())
        );
        assert_eq!(cache.load("key"), Some("new".to_string()));
    }

    #[test]
    fn test_load_exist_store_overwrite() {
        let cache = ShardedCache::new(50);

        // overwrite forces the write and still reports the old state
        assert_eq!(cache.load_exist_store("key", "v1", true, true), None);
        assert_eq!(cache.load("key"), Some("v1".to_string()));
        assert_eq!(
            cache.load_exist_store("key", "v2", false, true),
            Some("v1".to_string())
        );
        assert_eq!(cache.load("key"), Some("v2".to_string()));
    }

    #[test]
    fn test_load_modify_store_initial() {
        let cache = ShardedCache::new(50);

        let (value, status) = cache.load_modify_store(
            "counter",
            |current| {
                let n: i64 = current.parse().unwrap();
                ((n + 1).to_string(), true)
            },
            "0",
        );
        assert_eq!(value, "1");
        assert!(status);
        assert_eq!(cache.load("counter"), Some("1".to_string()));
    }

    #[test]
    fn test_load_modify_store_failure_keeps_value() {
        let cache = ShardedCache::new(50);

        cache.store("key", "text");
        let (value, status) =
            cache.load_modify_store("key", |current| (current.to_string(), false), "0");
        assert_eq!(value, "text");
        assert!(!status);
        assert_eq!(cache.load("key"), Some("text".to_string()));
    }

    #[test]
    fn test_clear() {
        let cache = ShardedCache::new(50);

        for i in 0..100 {
            cache.store(&format!("key-{i}"), "value");
        }
        assert_eq!(cache.count().0, 100);

        cache.clear();
        assert_eq!(cache.count().0, 0);
    }

    #[test]
    fn test_range_interleaved() {
        let cache = ShardedCache::new(50);

        cache.store("a", "1");
        cache.store("b", "2");

        let (items, total) = cache.range();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 4);

        // Traversal order is unspecified, but items interleave key, value
        let mut pairs: Vec<(String, String)> = items
            .chunks(2)
            .map(|kv| (kv[0].clone(), kv[1].clone()))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_count_per_shard() {
        let cache = ShardedCache::new(50);

        for i in 0..500 {
            cache.store(&format!("key-{i}"), "value");
        }

        let (total, subtotal) = cache.count();
        assert_eq!(total, 500);
        assert_eq!(subtotal.len(), 50);
        assert_eq!(subtotal.iter().sum::<usize>(), 500);
    }

    #[test]
    fn test_shard_selection_is_deterministic() {
        let cache = ShardedCache::new(50);

        for key in ["a", "hello", "600", "äöü"] {
            assert_eq!(cache.shard_index(key), cache.shard_index(key));
            assert!(cache.shard_index(key) < 50);
        }
    }

    #[test]
    fn test_container_databases_are_independent() {
        let container = CacheContainer::new(3, 50);

        container.database(0).store("key", "zero");
        container.database(1).store("key", "one");

        assert_eq!(container.database(0).load("key"), Some("zero".to_string()));
        assert_eq!(container.database(1).load("key"), Some("one".to_string()));
        assert_eq!(container.database(2).load("key"), None);
        assert_eq!(container.len(), 3);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache = Arc::new(ShardedCache::new(50));
        let mut handles = vec![];

        for t in 0..10 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("key-{t}-{i}");
                    cache.store(&key, "value");
                    assert_eq!(cache.load(&key), Some("value".to_string()));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.count().0, 1000);
    }

    #[test]
    fn test_concurrent_modify_is_atomic() {
        use std::thread;

        let cache = Arc::new(ShardedCache::new(50));
        let mut handles = vec![];

        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    cache.load_modify_store(
                        "counter",
                        |current| {
                            let n: i64 = current.parse().unwrap();
                            ((n + 1).to_string(), true)
                        },
                        "0",
                    );
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.load("counter"), Some("8000".to_string()));
    }
}
