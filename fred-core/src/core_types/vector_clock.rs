/*
    vector_clock.rs - Versions of stored items

    Every write carries a vector clock: a counter per node that has written
    the item. Comparing two clocks tells whether one write has observed the
    other (Ancestor/Descendant), whether they are the same write (Equal), or
    whether they happened independently (Concurrent). Concurrent versions of
    one item are kept side by side as siblings.

    Clocks are values: `tick` and `merge` mutate the receiver, so callers
    clone before mutating a clock that is shared with a live set.
*/

use super::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Position of one clock relative to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockOrdering {
    /// Same version
    Equal,
    /// Happened before the other clock
    Ancestor,
    /// Happened after the other clock
    Descendant,
    /// Neither has observed the other
    Concurrent,
}

impl ClockOrdering {
    /// The ordering seen from the other side.
    pub fn reverse(self) -> Self {
        match self {
            ClockOrdering::Ancestor => ClockOrdering::Descendant,
            ClockOrdering::Descendant => ClockOrdering::Ancestor,
            other => other,
        }
    }
}

/// Vector clock keyed by node ID.
///
/// Absent entries count as zero, so `{a:1}` and `{a:1, b:0}` are equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clock: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        VectorClock { clock: BTreeMap::new() }
    }

    /// Counter for `node_id`, zero if it never wrote.
    pub fn get(&self, node_id: &str) -> u64 {
        self.clock.get(node_id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, node_id: &str, counter: u64) {
        if counter == 0 {
            self.clock.remove(node_id);
        } else {
            self.clock.insert(node_id.to_string(), counter);
        }
    }

    /// Record one more write by `node_id`.
    pub fn tick(&mut self, node_id: &str) {
        *self.clock.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Entry-wise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node_id, &counter) in &other.clock {
            if counter == 0 {
                continue;
            }
            let current = self.clock.entry(node_id.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Merge of every clock in `clocks`; empty input gives an empty clock.
    pub fn merged<'a>(clocks: impl IntoIterator<Item = &'a VectorClock>) -> VectorClock {
        let mut result = VectorClock::new();
        for clock in clocks {
            result.merge(clock);
        }
        result
    }

    /// Where `self` stands relative to `other`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut behind = false;
        let mut ahead = false;

        for node_id in self.clock.keys().chain(other.clock.keys()) {
            let mine = self.get(node_id);
            let theirs = other.get(node_id);
            if mine < theirs {
                behind = true;
            } else if mine > theirs {
                ahead = true;
            }
            if behind && ahead {
                return ClockOrdering::Concurrent;
            }
        }

        match (behind, ahead) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Ancestor,
            (false, true) => ClockOrdering::Descendant,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Shorthand for `self.compare(other) == ordering`.
    pub fn is(&self, other: &VectorClock, ordering: ClockOrdering) -> bool {
        self.compare(other) == ordering
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.clock.iter().filter(|&(_, &c)| c > 0).map(|(id, _)| id)
    }

    pub fn is_empty(&self) -> bool {
        self.clock.values().all(|&c| c == 0)
    }

    /// Number of nodes with a non-zero counter
    pub fn len(&self) -> usize {
        self.clock.values().filter(|&&c| c > 0).count()
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrdering::Equal
    }
}

impl Eq for VectorClock {}

impl Hash for VectorClock {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (node_id, counter) in self.clock.iter().filter(|&(_, &c)| c > 0) {
            node_id.hash(state);
            counter.hash(state);
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for (node_id, counter) in self.clock.iter().filter(|&(_, &c)| c > 0) {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{node_id}:{counter}")?;
            first = false;
        }
        f.write_str("}")
    }
}

impl<S: Into<NodeId>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        let mut vc = VectorClock::new();
        for (node_id, counter) in iter {
            let node_id: NodeId = node_id.into();
            vc.set(&node_id, counter);
        }
        vc
    }
}
