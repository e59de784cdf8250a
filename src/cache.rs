//! Cache - the live snapshot behind a reader/writer lock.
//!
//! Wraps a [`Snapshot`] with the lookup memoizer and a pool of gate hashers.
//! Readers share the lock for the whole scan; a swap takes it exclusively.
//!
//! # Swap ordering
//! 1. Take the write lock (waits for every in-flight read to finish)
//! 2. Replace the snapshot and clear the memoizer
//! 3. Release the lock
//! 4. Drop the old snapshot, unmapping its collections
//!
//! Step 4 happens in the caller of [`Cache::swap`], outside the lock, so
//! readers are never held up by `munmap`.
//!
//! Once [`Cache::close`] has run, every later swap is refused and the
//! rejected snapshot is handed back to the caller to drop.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::gate::HashPool;
use crate::snapshot::Snapshot;
use crate::storage::{HotCache, LookupCacheStats, SnapshotStats};
use crate::types::GateList;

/// Lock-protected snapshot with memoized lookups.
#[derive(Debug)]
pub struct Cache {
    snapshot: RwLock<Snapshot>,
    lookups: HotCache,
    hashes: HashPool,
    /// Number of successful swaps
    generation: AtomicU64,
    /// Set under the write lock by `close`
    closed: AtomicBool,
}

impl Cache {
    /// Wraps `snapshot`, memoizing up to `lookup_capacity` lookups (0 disables).
    pub fn new(snapshot: Snapshot, lookup_capacity: usize) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            lookups: HotCache::with_capacity(lookup_capacity),
            hashes: HashPool::new(),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true if `gate` of `family` is open for `id` in `collection`.
    ///
    /// A memoized lookup for the same identity answers without a scan.
    pub fn gate_open(&self, family: &str, gate: &str, collection: &str, id: &str) -> bool {
        if let Some(gates) = self.lookups.recall(family, collection, id) {
            return gates.binary_search_by(|g| (**g).cmp(gate)).is_ok();
        }

        let snapshot = self.snapshot.read();
        snapshot.gate_open(family, gate, collection, id, &mut self.hashes.checkout())
    }

    /// Gates of `family` open for `id` in `collection`, sorted and deduplicated.
    pub fn lookup_gates(&self, family: &str, collection: &str, id: &str) -> GateList {
        if let Some(gates) = self.lookups.lookup(family, collection, id) {
            return gates;
        }

        // Insert before releasing the read lock: a swap cannot run in
        // between, so the entry never outlives its generation.
        let snapshot = self.snapshot.read();
        let gates = snapshot.lookup_gates(family, collection, id, &mut self.hashes.checkout());
        self.lookups.insert(family, collection, id, gates.clone());
        gates
    }

    /// Installs `next` and returns the snapshot it replaced.
    ///
    /// Fails with `next` itself once the cache is closed. Either way the
    /// returned snapshot still holds its mappings; dropping it unmaps them.
    #[must_use = "dropping the returned snapshot unmaps it"]
    pub fn swap(&self, next: Snapshot) -> std::result::Result<Snapshot, Snapshot> {
        let mut snapshot = self.snapshot.write();
        if self.closed.load(Ordering::Acquire) {
            return Err(next);
        }
        let previous = std::mem::replace(&mut *snapshot, next);
        self.lookups.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(previous)
    }

    /// Replaces the snapshot with an empty one, unmaps the old one and
    /// refuses every later swap.
    pub fn close(&self) {
        let previous = {
            let mut snapshot = self.snapshot.write();
            self.closed.store(true, Ordering::Release);
            self.lookups.clear();
            std::mem::take(&mut *snapshot)
        };
        drop(previous);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of successful swaps since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.snapshot.read().stats()
    }

    pub fn lookup_stats(&self) -> LookupCacheStats {
        self.lookups.stats()
    }

    /// `(group, tier)` names of the live snapshot, in lookup order.
    pub fn tiers(&self) -> Vec<(String, String)> {
        self.snapshot
            .read()
            .tiers()
            .map(|(group, tier)| (group.to_string(), tier.to_string()))
            .collect()
    }
}
