//! In-memory storage for a loaded feature database.
//!
//! - **IdentityIndex**: memory-mapped, sorted collection file (O(log n) membership)
//! - **CachedTier**: per-tier identity indexes and enablement records
//! - **HotCache**: LRU of `(family, collection, id)` lookups
//!
//! Identity bytes stay in the mapped files; everything else is materialized
//! once per load and never mutated afterwards.

pub mod hot_cache;
pub mod identity_index;
pub mod types;

pub use hot_cache::{HotCache, LookupCacheStats};
pub use identity_index::IdentityIndex;
pub use types::{CachedGate, CachedTier, SnapshotStats, StringInterner};
