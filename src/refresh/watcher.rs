//! Debounced file system watcher for a mount point.
//!
//! Owns a `notify` subscription on its own task and turns bursts of file
//! events into single change notifications.
//!
//! # Subscriptions
//! - the resolved mount point, recursively
//! - the directory holding the mount point, non-recursively, so an atomic
//!   symlink flip of the mount point is seen and the recursive watch is
//!   moved to the new target
//!
//! # Debounce
//! The first relevant event opens a window of `debounce`; the notification
//! is sent when the window closes, however many events arrived inside it.
//! The notification channel holds one pending signal, so a consumer that is
//! busy reloading sees at most one more.

use log::{debug, info, warn};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::{Error, Result};

/// Undelivered watcher errors kept before new ones are dropped.
const ERROR_BACKLOG: usize = 16;

/// Handle to a running watcher task.
pub struct Watcher {
    /// One `()` per debounced burst of changes
    pub events: mpsc::Receiver<()>,
    /// Observation failures; the watcher keeps running after reporting one
    pub errors: mpsc::Receiver<Error>,
    task: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Subscribes to `mount` and spawns the debounce task.
    ///
    /// The task runs until `shutdown` turns true or its sender is dropped.
    /// Must be called from within a tokio runtime.
    pub fn start(
        mount: &Path,
        debounce: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut inner = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Fails only once the task is gone.
            let _ = raw_tx.send(res);
        })?;

        let target = std::fs::canonicalize(mount).map_err(|e| Error::io("resolve", mount, e))?;
        inner.watch(&target, RecursiveMode::Recursive)?;

        let parent = parent_dir(mount);
        if let Err(e) = inner.watch(&parent, RecursiveMode::NonRecursive) {
            warn!(
                "Cannot watch {} for symlink swaps of {}: {}",
                parent.display(),
                mount.display(),
                e
            );
        }

        let (events_tx, events) = mpsc::channel(1);
        let (errors_tx, errors) = mpsc::channel(ERROR_BACKLOG);

        let task = WatchTask {
            inner,
            mount: mount.to_path_buf(),
            target,
            debounce,
            events: events_tx,
            errors: errors_tx,
        };
        info!(
            "Watching {} with {}ms debounce",
            mount.display(),
            debounce.as_millis()
        );
        let task = tokio::spawn(task.run(raw_rx, shutdown));

        Ok(Self {
            events,
            errors,
            task: Some(task),
        })
    }

    /// Waits for the watcher task to exit after shutdown was signalled.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Watcher task ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("running", &self.task.is_some())
            .finish()
    }
}

struct WatchTask {
    inner: RecommendedWatcher,
    /// Mount point as configured, possibly a symlink
    mount: PathBuf,
    /// Directory currently watched recursively
    target: PathBuf,
    debounce: Duration,
    events: mpsc::Sender<()>,
    errors: mpsc::Sender<Error>,
}

impl WatchTask {
    async fn run(
        mut self,
        mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut pending: Option<Instant> = None;

        while !*shutdown.borrow_and_update() {
            let deadline = pending.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep_until(deadline), if pending.is_some() => {
                    pending = None;
                    // Full means a notification is already waiting.
                    let _ = self.events.try_send(());
                }
                res = raw.recv() => match res {
                    Some(Ok(event)) => {
                        if self.observe(&event) && pending.is_none() {
                            pending = Some(Instant::now() + self.debounce);
                        }
                    }
                    Some(Err(e)) => self.report(Error::Watch(e)),
                    None => break,
                },
            }
        }

        info!("Stopped watching {}", self.mount.display());
    }

    /// Returns true if `event` should trigger a reload.
    fn observe(&mut self, event: &Event) -> bool {
        if let EventKind::Access(kind) = event.kind {
            if kind != AccessKind::Close(AccessMode::Write) {
                return false;
            }
        }

        if event.paths.is_empty() {
            return true;
        }

        let mut relevant = false;
        for path in &event.paths {
            if path.starts_with(&self.target) {
                relevant = true;
            } else if path.file_name().is_some() && path.file_name() == self.mount.file_name() {
                relevant |= self.retarget();
            }
        }
        relevant
    }

    /// Moves the recursive watch if the mount point now resolves elsewhere.
    fn retarget(&mut self) -> bool {
        let target = match std::fs::canonicalize(&self.mount) {
            Ok(target) => target,
            Err(e) => {
                debug!("Mount point {} not resolvable: {}", self.mount.display(), e);
                return false;
            }
        };
        if target == self.target {
            return false;
        }

        let _ = self.inner.unwatch(&self.target);
        if let Err(e) = self.inner.watch(&target, RecursiveMode::Recursive) {
            self.report(Error::Watch(e));
        }
        info!(
            "Mount point {} now resolves to {}",
            self.mount.display(),
            target.display()
        );
        self.target = target;
        true
    }

    fn report(&self, error: Error) {
        warn!("Watcher error on {}: {}", self.mount.display(), error);
        if self.errors.try_send(error).is_err() {
            debug!("Watcher error backlog full, dropping error");
        }
    }
}

/// Directory containing `path`, `.` for a bare relative name.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
