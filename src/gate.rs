//! Gate evaluation.
//!
//! A gate is open for an identity when the identity's bucket, derived from a
//! 64-bit FNV-1a hash of `identity ++ salt`, falls inside the rollout volume:
//!
//! ```text
//! bucket = (fnv1a64(id ++ salt) % 100) + 1      // 1..=100
//! open   = bucket <= volume * 100
//! ```
//!
//! The bucket only depends on the identity and the salt, so raising a gate's
//! volume only ever adds identities to the open set. The algorithm must stay
//! bit-compatible with the writers and other readers of the same database.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Initial capacity of a hasher's scratch buffer.
const SCRATCH_CAPACITY: usize = 128;

/// Free lists per pool. Threads are spread over them round-robin.
const SHARDS: usize = 16;

/// Hashers retained per shard once checked back in.
const MAX_POOLED_PER_SHARD: usize = 8;

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD: usize = NEXT_SHARD.fetch_add(1, Ordering::Relaxed) % SHARDS;
}

/// Shard of the calling thread, fixed for the thread's lifetime.
#[inline]
fn shard_index() -> usize {
    SHARD.with(|shard| *shard)
}

/// FNV-1a, 64-bit.
#[inline]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Reusable scratch state for hashing `identity ++ salt`.
///
/// The buffer is cleared, never reallocated, between calls as long as the
/// inputs fit its capacity.
#[derive(Debug)]
pub struct GateHasher {
    buffer: Vec<u8>,
}

impl Default for GateHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl GateHasher {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(SCRATCH_CAPACITY),
        }
    }

    /// Hashes the concatenation of `id` and `salt`, without separator.
    #[inline]
    pub fn hash(&mut self, id: &str, salt: &str) -> u64 {
        self.buffer.clear();
        self.buffer.extend_from_slice(id.as_bytes());
        self.buffer.extend_from_slice(salt.as_bytes());
        fnv1a64(&self.buffer)
    }
}

/// Returns true if the gate is open for `id`.
///
/// `volume <= 0` is never open, `volume >= 1` is always open. In between the
/// decision is a pure function of `(id, salt, volume)`.
#[inline]
pub fn open_gate(id: &str, salt: &str, volume: f64, hasher: &mut GateHasher) -> bool {
    if volume <= 0.0 {
        return false;
    }

    if volume >= 1.0 {
        return true;
    }

    let bucket = (hasher.hash(id, salt) % 100) + 1;
    (bucket as f64) <= 100.0 * volume
}

// ================================================================================================
// HASHER POOL
// ================================================================================================

/// Thread-safe pool of [`GateHasher`] values (checkout/checkin).
///
/// Each thread checks out from and back into its own shard, so readers on
/// different threads rarely meet on a lock. A guard dropped on another
/// thread still returns to the shard it came from.
#[derive(Debug, Default)]
pub struct HashPool {
    shards: [Mutex<Vec<GateHasher>>; SHARDS],
}

impl HashPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a hasher from the pool, creating one when the shard is empty.
    ///
    /// The hasher returns to the pool when the guard is dropped.
    pub fn checkout(&self) -> PooledHasher<'_> {
        let shard = shard_index();
        let hasher = self.shards[shard].lock().pop().unwrap_or_default();
        PooledHasher {
            pool: self,
            shard,
            hasher: Some(hasher),
        }
    }

    /// Number of idle hashers currently held.
    pub fn idle(&self) -> usize {
        self.shards.iter().map(|free| free.lock().len()).sum()
    }

    fn checkin(&self, shard: usize, hasher: GateHasher) {
        let mut free = self.shards[shard].lock();
        if free.len() < MAX_POOLED_PER_SHARD {
            free.push(hasher);
        }
    }
}

/// A hasher checked out of a [`HashPool`].
pub struct PooledHasher<'a> {
    pool: &'a HashPool,
    shard: usize,
    hasher: Option<GateHasher>,
}

impl Deref for PooledHasher<'_> {
    type Target = GateHasher;

    fn deref(&self) -> &GateHasher {
        // Only `drop` takes the hasher out.
        self.hasher.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledHasher<'_> {
    fn deref_mut(&mut self) -> &mut GateHasher {
        self.hasher.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledHasher<'_> {
    fn drop(&mut self) {
        if let Some(hasher) = self.hasher.take() {
            self.pool.checkin(self.shard, hasher);
        }
    }
}
