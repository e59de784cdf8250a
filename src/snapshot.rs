//! Immutable in-memory view of a feature database.
//!
//! A snapshot is built by one full scan of the mount point and never changes
//! afterwards. Collections stay memory-mapped for as long as the snapshot
//! lives; dropping it unmaps them.
//!
//! # Lookup rule
//! Tiers are scanned in `(group, tier)` name order. The first tier whose
//! collection contains the identity decides the answer; later tiers are never
//! consulted, even when they also contain the identity.

use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gate::{open_gate, GateHasher};
use crate::mount::{MountPoint, Tier};
use crate::storage::{CachedGate, CachedTier, IdentityIndex, SnapshotStats, StringInterner};
use crate::types::{empty_gate_list, GateList};

/// Immutable materialization of a feature database.
#[derive(Debug, Default)]
pub struct Snapshot {
    tiers: Vec<CachedTier>,
}

impl Snapshot {
    /// A snapshot with no tiers; every gate is closed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads every tier under `mount`.
    ///
    /// Fails as a whole on the first unreadable directory, unparsable record
    /// or out-of-range volume; a partial snapshot is never returned.
    pub fn load(mount: &MountPoint) -> Result<Self> {
        let mount = mount.resolve()?;
        let mut loader = Loader {
            mount: &mount,
            strings: StringInterner::new(),
            salts: HashMap::new(),
        };

        let mut tiers = Vec::new();
        for group in mount.groups()? {
            for name in mount.tiers(&group)? {
                tiers.push(loader.load_tier(mount.tier(&group, &name))?);
            }
        }

        debug!(
            "Loaded {} tiers from {} ({} distinct names)",
            tiers.len(),
            mount.path().display(),
            loader.strings.len()
        );
        Ok(Self { tiers })
    }

    /// Returns true if `gate` of `family` is open for `id` in `collection`.
    pub fn gate_open(
        &self,
        family: &str,
        gate: &str,
        collection: &str,
        id: &str,
        hasher: &mut GateHasher,
    ) -> bool {
        let Some(tier) = self.matching_tier(collection, id) else {
            return false;
        };

        tier.gate(family, gate)
            .iter()
            .filter(|g| &*g.collection == collection)
            .any(|g| open_gate(id, &g.salt, g.volume, hasher))
    }

    /// Gates of `family` open for `id` in `collection`, sorted and deduplicated.
    pub fn lookup_gates(
        &self,
        family: &str,
        collection: &str,
        id: &str,
        hasher: &mut GateHasher,
    ) -> GateList {
        let Some(tier) = self.matching_tier(collection, id) else {
            return empty_gate_list();
        };

        // Records are sorted by name, so the open names come out sorted.
        let mut gates: Vec<Arc<str>> = Vec::new();
        for g in tier.family(family) {
            if &*g.collection != collection || !open_gate(id, &g.salt, g.volume, hasher) {
                continue;
            }
            if gates.last().map_or(true, |last| *last != g.name) {
                gates.push(Arc::clone(&g.name));
            }
        }

        gates.into()
    }

    /// First tier, in scan order, whose `collection` contains `id`.
    fn matching_tier(&self, collection: &str, id: &str) -> Option<&CachedTier> {
        self.tiers.iter().find(|tier| tier.contains(collection, id))
    }

    /// `(group, tier)` names in scan order.
    pub fn tiers(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tiers.iter().map(|t| (&*t.group, &*t.name))
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn stats(&self) -> SnapshotStats {
        let mut stats = SnapshotStats {
            tiers: self.tiers.len(),
            ..Default::default()
        };

        for tier in &self.tiers {
            stats.collections += tier.collections.len();
            for index in tier.collections.values() {
                stats.identities += index.len();
                stats.mapped_bytes += index.mapped_len();
            }
            stats.families += tier.gates.len();
            stats.gate_records += tier.gates.values().map(Vec::len).sum::<usize>();
        }

        stats
    }
}

// ================================================================================================
// LOADER
// ================================================================================================

struct Loader<'a> {
    mount: &'a MountPoint,
    strings: StringInterner,
    /// Definition salts by (family, gate), read at most once per load
    salts: HashMap<(Arc<str>, Arc<str>), Option<Arc<str>>>,
}

impl Loader<'_> {
    fn load_tier(&mut self, tier: Tier<'_>) -> Result<CachedTier> {
        let mut cached = CachedTier::new(
            self.strings.intern(tier.group()),
            self.strings.intern(tier.name()),
        );

        for family in tier.families()? {
            let family = self.strings.intern(&family);
            let mut records = Vec::new();

            for gate in tier.gates(&family)? {
                let gate = self.strings.intern(&gate);

                for collection in tier.gate_collections(&family, &gate)? {
                    let record = match tier.read_record(&family, &gate, &collection) {
                        Ok(record) => record,
                        Err(e) if e.is_not_found() => {
                            debug!("Record vanished during load: {}", e);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let salt = match record.salt {
                        Some(salt) => self.strings.intern(&salt),
                        None => match self.definition_salt(&family, &gate)? {
                            Some(salt) => salt,
                            None => {
                                return Err(Error::malformed(
                                    tier.record_path(&family, &gate, &collection),
                                    "record has no salt and the gate has no definition",
                                ))
                            }
                        },
                    };

                    records.push(CachedGate {
                        name: Arc::clone(&gate),
                        collection: self.strings.intern(&collection),
                        salt,
                        volume: record.volume,
                    });
                }
            }

            cached.gates.insert(family, records);
        }

        for collection in tier.collections()? {
            let index = match IdentityIndex::open(tier.collection_path(&collection)) {
                Ok(index) => index,
                Err(e) if e.is_not_found() => {
                    debug!("Collection vanished during load: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            cached.collections.insert(self.strings.intern(&collection), index);
        }

        cached.sort_gates();
        Ok(cached)
    }

    /// Salt from the gate definition, read at most once per gate.
    fn definition_salt(&mut self, family: &Arc<str>, gate: &Arc<str>) -> Result<Option<Arc<str>>> {
        let key = (Arc::clone(family), Arc::clone(gate));
        if let Some(salt) = self.salts.get(&key) {
            return Ok(salt.clone());
        }

        let salt = self
            .mount
            .read_salt(family, gate)?
            .map(|s| self.strings.intern(&s));
        self.salts.insert(key, salt.clone());
        Ok(salt)
    }
}
