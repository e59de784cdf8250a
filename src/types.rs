//! Shared value types.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sorted, deduplicated list of open gate names.
///
/// Names are shared with the snapshot that produced them, so cloning a list
/// (for instance out of the lookup cache) never copies string data.
pub type GateList = Arc<[Arc<str>]>;

/// Returns an empty gate list.
pub fn empty_gate_list() -> GateList {
    Arc::from(Vec::new())
}

/// Current Unix time in milliseconds.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Contents of one rollout record (`<tier>/gates/<family>/<gate>/<collection>`).
#[derive(Clone, Debug, PartialEq)]
pub struct GateRecord {
    /// Hash salt; `None` when the record relies on the gate definition
    pub salt: Option<String>,
    /// Fraction of the collection the gate is open for, in `[0, 1]`
    pub volume: f64,
    /// Legacy flag written by older generations; parsed but not evaluated
    pub open: bool,
}
