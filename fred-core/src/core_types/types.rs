//! Keygroups, nodes and items

use super::errors::{FredError, FredResult};
use super::vector_clock::VectorClock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a replica node, unique across the cluster
pub type NodeId = String;

/// Time-to-live for written rows; `None` keeps them forever
pub type Expiry = Option<Duration>;

fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Name of a keygroup.
///
/// Only ASCII alphanumerics are allowed, so a name can double as a path or
/// table component in every backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeygroupName(String);

impl KeygroupName {
    pub fn new(name: impl Into<String>) -> FredResult<Self> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(FredError::InvalidArgument(format!(
                "keygroup name '{name}' must be non-empty and alphanumeric"
            )));
        }
        Ok(KeygroupName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeygroupName {
    type Error = FredError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KeygroupName::new(value)
    }
}

impl From<KeygroupName> for String {
    fn from(name: KeygroupName) -> Self {
        name.0
    }
}

impl AsRef<str> for KeygroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeygroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check an item identifier against the same pattern as keygroup names.
pub fn validate_item_id(id: &str) -> FredResult<()> {
    if !is_valid_name(id) {
        return Err(FredError::InvalidArgument(format!(
            "item id '{id}' must be non-empty and alphanumeric"
        )));
    }
    Ok(())
}

/// How to reach a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, host: impl Into<String>) -> Self {
        Node { id: id.into(), host: host.into() }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.host)
    }
}

/// One version of one key in one keygroup.
///
/// A tombstone is an item with `tombstoned == true` and an empty value; it is
/// versioned exactly like a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub keygroup: KeygroupName,
    pub id: String,
    pub val: Vec<u8>,
    pub version: VectorClock,
    pub tombstoned: bool,
}

impl Item {
    pub fn new(keygroup: KeygroupName, id: impl Into<String>, val: impl Into<Vec<u8>>) -> Self {
        Item {
            keygroup,
            id: id.into(),
            val: val.into(),
            version: VectorClock::new(),
            tombstoned: false,
        }
    }

    pub fn tombstone(keygroup: KeygroupName, id: impl Into<String>) -> Self {
        Item {
            keygroup,
            id: id.into(),
            val: Vec::new(),
            version: VectorClock::new(),
            tombstoned: true,
        }
    }

    pub fn with_version(mut self, version: VectorClock) -> Self {
        self.version = version;
        self
    }
}

/// A node that is notified about changes to a keygroup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub host: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keygroup_name_validation() {
        assert!(KeygroupName::new("orders2024").is_ok());
        assert!(KeygroupName::new("").is_err());
        assert!(KeygroupName::new("with space").is_err());
        assert!(KeygroupName::new("dash-ed").is_err());
        assert!(KeygroupName::new("ümlaut").is_err());

        let err = KeygroupName::new("a/b").unwrap_err();
        assert_eq!(err.kind(), crate::core_types::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_keygroup_name_serde_rejects_invalid() {
        let ok: Result<KeygroupName, _> = serde_json::from_str("\"kg1\"");
        assert_eq!(ok.unwrap().as_str(), "kg1");

        let bad: Result<KeygroupName, _> = serde_json::from_str("\"kg 1\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_item_id_validation() {
        assert!(validate_item_id("x").is_ok());
        assert!(validate_item_id("Item42").is_ok());
        assert!(validate_item_id("").is_err());
        assert!(validate_item_id("a.b").is_err());
    }

    #[test]
    fn test_tombstone_is_empty() {
        let kg = KeygroupName::new("kg").unwrap();
        let item = Item::tombstone(kg, "x");
        assert!(item.tombstoned);
        assert!(item.val.is_empty());
        assert!(item.version.is_empty());
    }

    #[test]
    fn test_node_display() {
        assert_eq!(Node::new("nodeA", "10.0.0.1:9000").to_string(), "nodeA@10.0.0.1:9000");
    }
}
