//! Store configuration.
//!
//! Every field has a default, so an embedding service can carry a partial
//! `gatestore` object in its own JSON config or set only the environment
//! variables it cares about.

use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::storage::hot_cache::DEFAULT_CAPACITY;

pub const ENV_DEBOUNCE_MS: &str = "GATESTORE_DEBOUNCE_MS";
pub const ENV_LOOKUP_CACHE_CAPACITY: &str = "GATESTORE_LOOKUP_CACHE_CAPACITY";
pub const ENV_RESYNC_INTERVAL_SECS: &str = "GATESTORE_RESYNC_INTERVAL_SECS";

/// Configuration for a [`Store`](crate::Store).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Quiet period after the first file change before a reload starts;
    /// further changes inside the window are folded into the same reload
    pub debounce_ms: u64,
    /// Number of memoized lookups (0 disables memoization)
    pub lookup_cache_capacity: usize,
    /// Unconditional reload period in seconds (0 disables it)
    pub resync_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            lookup_cache_capacity: DEFAULT_CAPACITY,
            resync_interval_secs: 0,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `GATESTORE_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_value(ENV_DEBOUNCE_MS) {
            config.debounce_ms = v;
        }
        if let Some(v) = env_value(ENV_LOOKUP_CACHE_CAPACITY) {
            config.lookup_cache_capacity = v;
        }
        if let Some(v) = env_value(ENV_RESYNC_INTERVAL_SECS) {
            config.resync_interval_secs = v;
        }
        config
    }

    /// Parses a JSON object; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Resync period, `None` when disabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a non-negative integer", name, raw);
            None
        }
    }
}
