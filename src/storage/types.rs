//! Snapshot data structures.
//!
//! Defines the per-tier structures materialized by a load, and the string
//! interner used to share names across the whole tree.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::IdentityIndex;

/// One enablement record, resolved and ready for evaluation.
#[derive(Clone, Debug)]
pub struct CachedGate {
    /// Gate name
    pub name: Arc<str>,
    /// Collection the record applies to
    pub collection: Arc<str>,
    /// Hash salt of the gate
    pub salt: Arc<str>,
    /// Rollout volume in `[0, 1]`
    pub volume: f64,
}

/// A tier as materialized by a load.
#[derive(Debug)]
pub struct CachedTier {
    /// Group the tier belongs to
    pub group: Arc<str>,
    /// Tier name
    pub name: Arc<str>,
    /// Identity indexes by collection name
    pub collections: HashMap<Arc<str>, IdentityIndex>,
    /// Enablement records by family, sorted by gate name then collection
    pub gates: HashMap<Arc<str>, Vec<CachedGate>>,
}

impl CachedTier {
    pub fn new(group: Arc<str>, name: Arc<str>) -> Self {
        Self {
            group,
            name,
            collections: HashMap::new(),
            gates: HashMap::new(),
        }
    }

    /// Returns true if `collection` exists in this tier and contains `id`.
    #[inline]
    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|index| index.contains(id))
    }

    /// Records of `family`, sorted by gate name.
    #[inline]
    pub fn family(&self, family: &str) -> &[CachedGate] {
        self.gates.get(family).map(Vec::as_slice).unwrap_or_default()
    }

    /// Records of `family` named `gate`, located by binary search.
    pub fn gate(&self, family: &str, gate: &str) -> &[CachedGate] {
        let records = self.family(family);
        let start = records.partition_point(|g| &*g.name < gate);
        let end = start + records[start..].partition_point(|g| &*g.name == gate);
        &records[start..end]
    }

    pub(crate) fn sort_gates(&mut self) {
        for records in self.gates.values_mut() {
            records.sort_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then_with(|| a.collection.cmp(&b.collection))
            });
        }
    }
}

/// Per-load string deduplication.
///
/// Family, gate, collection and tier names repeat across the tree; every
/// distinct value is stored once.
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: HashSet<Arc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing);
        }
        let value: Arc<str> = Arc::from(s);
        self.strings.insert(Arc::clone(&value));
        value
    }

    /// Number of distinct strings held.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Statistics about a loaded snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    /// Number of tiers
    pub tiers: usize,
    /// Number of collections across all tiers
    pub collections: usize,
    /// Number of identity lines across all collections
    pub identities: usize,
    /// Bytes of collection files mapped into memory
    pub mapped_bytes: usize,
    /// Number of (tier, family) pairs
    pub families: usize,
    /// Number of enablement records
    pub gate_records: usize,
}
