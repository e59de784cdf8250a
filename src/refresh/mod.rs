//! Snapshot refresh - keep the live snapshot in step with the mount point.
//!
//! Provides two pieces:
//! 1. **Watcher**: debounced file system subscription on the mount point
//! 2. **ReloadService**: rebuilds and swaps the snapshot on change, on a
//!    resync schedule, or on demand

pub mod service;
pub mod watcher;

pub use service::{ReloadService, ReloadStats};
pub use watcher::Watcher;
