//! Reload service - rebuilds the snapshot and swaps it into the cache.
//!
//! Reloads are triggered three ways:
//! 1. **Watcher-driven**: one per debounced burst of file changes
//! 2. **Scheduled**: every `resync_interval` when configured, so a lost
//!    notification still converges
//! 3. **Explicit**: [`ReloadService::reload`] called by the store owner
//!
//! A reload builds a complete snapshot on the blocking pool. On success the
//! snapshot is swapped in and the previous one is unmapped on the same
//! thread, after the swap released the lock. On failure the live snapshot is
//! left untouched: serving slightly stale data beats serving nothing.

use log::{debug, error, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::mount::MountPoint;
use crate::refresh::Watcher;
use crate::snapshot::Snapshot;
use crate::storage::SnapshotStats;
use crate::types::now_ms;

/// Statistics about reloads since the store was opened.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReloadStats {
    /// Generation of the live snapshot (number of successful swaps)
    pub generation: u64,
    /// Successful reloads
    pub reloads: u64,
    /// Reloads that failed and kept the previous snapshot
    pub failures: u64,
    /// Errors reported by the watcher
    pub watcher_errors: u64,
    /// Timestamp of the last successful reload (ms since epoch), 0 if none
    pub last_reload_at: u64,
    /// Duration of the last successful reload in milliseconds
    pub last_duration_ms: u64,
    /// Message of the most recent failure, cleared by the next success
    pub last_error: Option<String>,
}

/// Rebuilds snapshots for one mount point.
pub struct ReloadService {
    mount: MountPoint,
    cache: Arc<Cache>,
    stats: RwLock<ReloadStats>,
    /// Serializes reloads so generations are installed in build order
    reloading: Mutex<()>,
}

impl ReloadService {
    pub fn new(mount: MountPoint, cache: Arc<Cache>) -> Self {
        Self {
            mount,
            cache,
            stats: RwLock::new(ReloadStats::default()),
            reloading: Mutex::new(()),
        }
    }

    pub fn stats(&self) -> ReloadStats {
        self.stats.read().clone()
    }

    /// Builds a fresh snapshot and swaps it in.
    ///
    /// # Returns
    /// Statistics of the installed snapshot, or the load error. On error the
    /// previous snapshot stays live. Fails with [`Error::Cancelled`] once the
    /// cache is closed; the freshly built snapshot is dropped unseen.
    pub async fn reload(&self) -> Result<SnapshotStats> {
        let _guard = self.reloading.lock().await;
        if self.cache.is_closed() {
            return Err(Error::Cancelled);
        }
        let start = now_ms();

        let mount = self.mount.clone();
        let cache = Arc::clone(&self.cache);
        let result = tokio::task::spawn_blocking(move || -> Result<SnapshotStats> {
            let snapshot = Snapshot::load(&mount)?;
            let stats = snapshot.stats();
            // Whichever snapshot comes back is unmapped here, outside the lock.
            match cache.swap(snapshot) {
                Ok(previous) => {
                    drop(previous);
                    Ok(stats)
                }
                Err(rejected) => {
                    drop(rejected);
                    Err(Error::Cancelled)
                }
            }
        })
        .await
        .map_err(Into::into)
        .and_then(|result| result);

        let duration_ms = now_ms().saturating_sub(start);
        let mut stats = self.stats.write();
        match &result {
            Ok(snapshot) => {
                stats.generation = self.cache.generation();
                stats.reloads += 1;
                stats.last_reload_at = now_ms();
                stats.last_duration_ms = duration_ms;
                stats.last_error = None;
                info!(
                    "Reload completed: generation {} with {} tiers and {} gate records in {}ms",
                    stats.generation, snapshot.tiers, snapshot.gate_records, duration_ms
                );
            }
            Err(Error::Cancelled) => {
                debug!("Reload of {} dropped, cache closed", self.mount.path().display());
            }
            Err(e) => {
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                error!(
                    "Reload of {} failed, keeping generation {}: {}",
                    self.mount.path().display(),
                    stats.generation,
                    e
                );
            }
        }

        result
    }

    /// Closes the cache once no reload is in flight.
    ///
    /// A reload that starts afterwards returns [`Error::Cancelled`].
    pub async fn close(&self) {
        let _guard = self.reloading.lock().await;
        self.cache.close();
    }

    /// Reload loop. Runs until `shutdown` turns true or its sender is dropped,
    /// then waits for the watcher to stop.
    pub async fn run(
        self: Arc<Self>,
        mut watcher: Watcher,
        mut shutdown: watch::Receiver<bool>,
        resync: Option<Duration>,
    ) {
        info!("Reload loop started for {}", self.mount.path().display());

        let mut resync = resync.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(e) = watcher.errors.recv() => {
                    self.stats.write().watcher_errors += 1;
                    error!("Watcher reported an error, serving last snapshot: {}", e);
                }
                Some(()) = watcher.events.recv() => {
                    debug!("Change detected under {}", self.mount.path().display());
                    let _ = self.reload().await;
                }
                _ = tick(&mut resync) => {
                    debug!("Scheduled resync of {}", self.mount.path().display());
                    let _ = self.reload().await;
                }
            }
        }

        watcher.closed().await;
        info!("Reload loop stopped for {}", self.mount.path().display());
    }
}

impl std::fmt::Debug for ReloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadService")
            .field("mount", &self.mount)
            .field("stats", &*self.stats.read())
            .finish()
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}
