//! Store - a hot-reloading feature database.
//!
//! A [`Store`] serves gate reads from the live snapshot of one mount point
//! and replaces that snapshot whenever the mount point changes.
//!
//! # Lifecycle
//! - [`Store::open`] loads the first snapshot, starts the watcher and spawns
//!   the reload loop
//! - reads are synchronous and never touch the file system
//! - [`Store::close`] signals shutdown, waits for the reload loop and the
//!   watcher to exit, and unmaps the live snapshot
//!
//! Shutdown is a broadcast on a `watch` channel, so the reload loop and the
//! watcher observe it no matter what they are waiting on. Dropping a store
//! without closing it sends the same signal.
//!
//! # Example
//! ```rust,no_run
//! use gatestore::{Store, StoreConfig};
//!
//! # async fn run() -> gatestore::Result<()> {
//! let store = Store::open("/var/lib/features", StoreConfig::from_env()).await?;
//! if store.gate_open("billing", "new-invoices", "workspaces", "ws-42") {
//!     // ...
//! }
//! let gates = store.lookup_gates("billing", "workspaces", "ws-42");
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::mount::MountPoint;
use crate::refresh::{ReloadService, ReloadStats, Watcher};
use crate::snapshot::Snapshot;
use crate::storage::{LookupCacheStats, SnapshotStats};
use crate::types::GateList;

/// Hot-reloading view of a feature database.
#[derive(Debug)]
pub struct Store {
    mount: MountPoint,
    cache: Arc<Cache>,
    service: Arc<ReloadService>,
    /// Broadcast "done" signal for the reload loop and the watcher
    shutdown: watch::Sender<bool>,
    /// Reload loop; held by `close` until the snapshot is released
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Opens the feature database at `mount`.
    ///
    /// The watcher subscribes before the first load so no change made while
    /// loading is missed. Any failure is returned and leaves nothing running.
    pub async fn open(mount: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let mount = MountPoint::new(mount);
        let (shutdown, done) = watch::channel(false);

        let mut watcher = Watcher::start(mount.path(), config.debounce(), done.clone())?;

        let initial = mount.clone();
        let loaded = tokio::task::spawn_blocking(move || Snapshot::load(&initial))
            .await
            .map_err(Error::from)
            .and_then(|result| result);
        let snapshot = match loaded {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = shutdown.send(true);
                watcher.closed().await;
                return Err(e);
            }
        };

        let stats = snapshot.stats();
        let cache = Arc::new(Cache::new(snapshot, config.lookup_cache_capacity));
        let service = Arc::new(ReloadService::new(mount.clone(), Arc::clone(&cache)));
        let task = tokio::spawn(Arc::clone(&service).run(watcher, done, config.resync_interval()));

        info!(
            "Opened feature database {}: {} tiers, {} collections, {} gate records",
            mount.path().display(),
            stats.tiers,
            stats.collections,
            stats.gate_records
        );

        Ok(Self {
            mount,
            cache,
            service,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Stops reloading and releases the live snapshot. Idempotent.
    ///
    /// Reads after close behave as on an empty database. Concurrent callers
    /// all return after the snapshot is released. The snapshot is released
    /// even when the reload loop panicked; the panic is returned afterwards.
    pub async fn close(&self) -> Result<()> {
        // Err only when the loop is already gone.
        let _ = self.shutdown.send(true);

        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return Ok(());
        };

        let joined = handle.await;
        self.service.close().await;
        info!("Closed feature database {}", self.mount.path().display());
        joined.map_err(Error::from)
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Returns true if `gate` of `family` is open for `id` in `collection`.
    pub fn gate_open(&self, family: &str, gate: &str, collection: &str, id: &str) -> bool {
        self.cache.gate_open(family, gate, collection, id)
    }

    /// Gates of `family` open for `id` in `collection`, sorted and deduplicated.
    pub fn lookup_gates(&self, family: &str, collection: &str, id: &str) -> GateList {
        self.cache.lookup_gates(family, collection, id)
    }

    /// Reloads now, without waiting for a file change.
    ///
    /// Fails with [`Error::Cancelled`] once the store is closed.
    pub async fn reload(&self) -> Result<SnapshotStats> {
        if self.is_closed() {
            return Err(Error::Cancelled);
        }
        self.service.reload().await
    }

    /// Number of successful reloads since open.
    pub fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }

    /// `(group, tier)` names of the live snapshot, in lookup order.
    pub fn tiers(&self) -> Vec<(String, String)> {
        self.cache.tiers()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            snapshot: self.cache.snapshot_stats(),
            lookups: self.cache.lookup_stats(),
            reloads: self.service.stats(),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Combined statistics of a store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub snapshot: SnapshotStats,
    pub lookups: LookupCacheStats,
    pub reloads: ReloadStats,
}
