//! Hot cache - LRU memoization of gate lookups.
//!
//! Maps `(family, collection, identity)` to the list of gates open for that
//! identity. Entries are located by a 64-bit hash of the three strings,
//! seeded once per process, and verified against the stored strings on every
//! hit, so a hash collision degrades to a miss instead of a wrong answer.
//!
//! The cache is purely derived data: the owner clears it whenever the
//! snapshot it memoizes is replaced.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::LazyLock;

use crate::types::GateList;

/// Default number of memoized lookups.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Process-wide hash seed for lookup keys.
static LOOKUP_SEED: LazyLock<RandomState> = LazyLock::new(RandomState::new);

#[inline]
fn key_hash(family: &str, collection: &str, id: &str) -> u64 {
    LOOKUP_SEED.hash_one((family, collection, id))
}

struct LookupEntry {
    family: Box<str>,
    collection: Box<str>,
    id: Box<str>,
    gates: GateList,
}

impl LookupEntry {
    #[inline]
    fn matches(&self, family: &str, collection: &str, id: &str) -> bool {
        &*self.id == id && &*self.collection == collection && &*self.family == family
    }
}

struct Inner {
    entries: LruCache<u64, LookupEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Fixed-capacity LRU of gate lookups.
pub struct HotCache {
    /// `None` when memoization is disabled (capacity 0)
    inner: Option<Mutex<Inner>>,
    capacity: usize,
}

impl std::fmt::Debug for HotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("HotCache")
            .field("entries", &stats.entries)
            .field("capacity", &stats.capacity)
            .finish()
    }
}

impl Default for HotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HotCache {
    /// Create a cache holding [`DEFAULT_CAPACITY`] lookups.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a cache holding at most `capacity` lookups; 0 disables it.
    pub fn with_capacity(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| {
            Mutex::new(Inner {
                entries: LruCache::new(cap),
                hits: 0,
                misses: 0,
                evictions: 0,
            })
        });
        Self { inner, capacity }
    }

    /// Returns the memoized gates for the key, promoting it to most recently used.
    pub fn lookup(&self, family: &str, collection: &str, id: &str) -> Option<GateList> {
        self.get(family, collection, id, true)
    }

    /// Like [`HotCache::lookup`], but an absent key is not counted as a miss.
    ///
    /// For readers that answer from a memoized list when there is one and
    /// never memoize their own result.
    pub fn recall(&self, family: &str, collection: &str, id: &str) -> Option<GateList> {
        self.get(family, collection, id, false)
    }

    fn get(&self, family: &str, collection: &str, id: &str, count_miss: bool) -> Option<GateList> {
        let inner = self.inner.as_ref()?;
        let hash = key_hash(family, collection, id);

        let mut inner = inner.lock();
        let found = match inner.entries.get(&hash) {
            Some(entry) if entry.matches(family, collection, id) => Some(entry.gates.clone()),
            _ => None,
        };

        if found.is_some() {
            inner.hits += 1;
        } else if count_miss {
            inner.misses += 1;
        }
        found
    }

    /// Memoizes `gates` for the key, evicting the least recently used entry
    /// when the cache is full.
    pub fn insert(&self, family: &str, collection: &str, id: &str, gates: GateList) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let hash = key_hash(family, collection, id);
        let entry = LookupEntry {
            family: family.into(),
            collection: collection.into(),
            id: id.into(),
            gates,
        };

        let mut inner = inner.lock();
        if let Some((evicted, _)) = inner.entries.push(hash, entry) {
            if evicted != hash {
                inner.evictions += 1;
            }
        }
    }

    /// Returns true if the key is memoized, without promoting it.
    pub fn contains(&self, family: &str, collection: &str, id: &str) -> bool {
        let Some(inner) = self.inner.as_ref() else {
            return false;
        };
        let hash = key_hash(family, collection, id);
        inner
            .lock()
            .entries
            .peek(&hash)
            .is_some_and(|entry| entry.matches(family, collection, id))
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        if let Some(inner) = self.inner.as_ref() {
            inner.lock().entries.clear();
        }
    }

    pub fn stats(&self) -> LookupCacheStats {
        match self.inner.as_ref() {
            Some(inner) => {
                let inner = inner.lock();
                LookupCacheStats {
                    entries: inner.entries.len(),
                    capacity: self.capacity,
                    hits: inner.hits,
                    misses: inner.misses,
                    evictions: inner.evictions,
                }
            }
            None => LookupCacheStats::default(),
        }
    }
}

/// Statistics about the lookup cache.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LookupCacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to be computed
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
}
