/*
    version_cache.rs - Live version sets per item

    For each (keygroup, item) the cache holds the clocks that are currently
    live: written, not yet superseded, and pairwise concurrent. The physical
    store may still hold rows for other versions (a prune failed, or the
    process restarted); those rows are ignored because their clock is not in
    the live set.

    Entries sit in a striped map so unrelated items never contend. Each entry
    is an async mutex that writers hold across the whole
    merge/tick/persist/prune sequence, which serializes version changes to
    one item without blocking any other item.
*/

use crate::core_types::{ClockOrdering, KeygroupName, VectorClock};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Concurrent versions of one item.
///
/// Invariant: no two clocks in `clocks` are ordered against each other.
#[derive(Debug, Default)]
pub struct LiveSet {
    loaded: bool,
    clocks: Vec<VectorClock>,
}

impl LiveSet {
    pub fn clocks(&self) -> &[VectorClock] {
        &self.clocks
    }

    pub fn contains(&self, version: &VectorClock) -> bool {
        self.clocks.iter().any(|c| c == version)
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Whether the set has been initialized from the physical store.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Initialize from the versions found in the physical store.
    ///
    /// Keeps only the maximal versions; returns the dominated ones so the
    /// caller can prune their rows.
    pub fn seed<'a>(
        &mut self,
        versions: impl IntoIterator<Item = &'a VectorClock>,
    ) -> Vec<VectorClock> {
        let mut stale = Vec::new();
        for version in versions {
            if self.contains(version) || stale.contains(version) {
                continue;
            }
            if self.clocks.iter().any(|c| version.is(c, ClockOrdering::Ancestor)) {
                stale.push(version.clone());
                continue;
            }
            stale.extend(self.supersede(version));
            self.clocks.push(version.clone());
        }
        self.loaded = true;
        stale
    }

    /// Replace the whole set with `version`; returns everything it replaced.
    pub fn replace_all(&mut self, version: VectorClock) -> Vec<VectorClock> {
        let superseded = std::mem::replace(&mut self.clocks, vec![version]);
        self.loaded = true;
        superseded
    }

    /// Add `version`, dropping every live clock that is not concurrent with
    /// it. Returns the dropped clocks.
    pub fn resolve(&mut self, version: VectorClock) -> Vec<VectorClock> {
        let dropped = self.supersede(&version);
        self.clocks.push(version);
        self.loaded = true;
        dropped
    }

    /// First live clock that has moved past one of the `known` versions.
    ///
    /// A writer that read `known` and finds such a clock worked on a stale
    /// snapshot.
    pub fn find_newer_than<'a>(
        &'a self,
        known: &[VectorClock],
    ) -> Option<(&'a VectorClock, VectorClock)> {
        for live in &self.clocks {
            if let Some(k) = known.iter().find(|k| k.is(live, ClockOrdering::Ancestor)) {
                return Some((live, k.clone()));
            }
        }
        None
    }

    /// Whether a remote `version` is already covered by an equal or newer
    /// live clock.
    pub fn covers(&self, version: &VectorClock) -> bool {
        self.clocks
            .iter()
            .any(|c| matches!(c.compare(version), ClockOrdering::Equal | ClockOrdering::Descendant))
    }

    fn supersede(&mut self, version: &VectorClock) -> Vec<VectorClock> {
        let (keep, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.clocks)
            .into_iter()
            .partition(|c| c.is(version, ClockOrdering::Concurrent));
        self.clocks = keep;
        dropped
    }
}

type ItemKey = (KeygroupName, String);

/// Live sets for every item this node has touched
#[derive(Debug, Default)]
pub struct VersionCache {
    items: DashMap<ItemKey, Arc<Mutex<LiveSet>>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live set for an item, created empty (and unloaded) on first use.
    pub fn entry(&self, keygroup: &KeygroupName, id: &str) -> Arc<Mutex<LiveSet>> {
        let key = (keygroup.clone(), id.to_string());
        if let Some(entry) = self.items.get(&key) {
            return entry.clone();
        }
        self.items.entry(key).or_default().clone()
    }

    /// Whether an item has an entry, without creating one.
    pub fn contains(&self, keygroup: &KeygroupName, id: &str) -> bool {
        self.items.contains_key(&(keygroup.clone(), id.to_string()))
    }

    /// Drop every entry of a keygroup.
    pub fn forget_keygroup(&self, keygroup: &KeygroupName) {
        self.items.retain(|(kg, _), _| kg != keygroup);
    }

    /// Number of cached items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
