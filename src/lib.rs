//! Gatestore - read side of a percentage-rollout feature database.
//!
//! Loads a directory tree of tiers, identity collections and rollout records
//! into an immutable snapshot, answers "is this gate open for this identity"
//! from memory, and swaps in a fresh snapshot when the tree changes.
//!
//! # Architecture
//! - **Snapshot**: immutable materialization of the mount point; identity
//!   collections stay memory-mapped
//! - **Cache**: the live snapshot behind a reader/writer lock, with an LRU of
//!   lookups in front of it
//! - **Store**: a cache kept current by a debounced watcher and reload loop
//!
//! Readers never see a half-swapped snapshot and never touch unmapped memory:
//! a swap waits for in-flight reads, and the old snapshot is dropped only
//! after the swap released the lock.

pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod mount;
pub mod refresh;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod types;

pub use cache::Cache;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use gate::{open_gate, GateHasher, HashPool};
pub use mount::{MountPoint, Tier};
pub use refresh::ReloadStats;
pub use snapshot::Snapshot;
pub use storage::{LookupCacheStats, SnapshotStats};
pub use store::{Store, StoreStats};
pub use types::{GateList, GateRecord};

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Loads the feature database at `mount` into a snapshot.
pub fn load(mount: impl Into<PathBuf>) -> Result<Snapshot> {
    Snapshot::load(&MountPoint::new(mount))
}

/// Waits until `mount` exists, or fails with [`Error::Cancelled`] once
/// `cancel` fires.
pub async fn wait(mount: impl Into<PathBuf>, cancel: &CancellationToken) -> Result<()> {
    MountPoint::new(mount).wait(cancel).await
}
