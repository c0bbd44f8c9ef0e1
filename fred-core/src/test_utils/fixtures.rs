//! Test fixtures for creating common test objects

use crate::core_store::{MemoryStore, StoreService};
use crate::core_types::{KeygroupName, Node, VectorClock};
use std::sync::Arc;

/// Keygroup name that is known to be valid
pub fn keygroup(name: &str) -> KeygroupName {
    match KeygroupName::new(name) {
        Ok(kg) => kg,
        Err(e) => panic!("invalid keygroup fixture '{name}': {e}"),
    }
}

/// Node with a host derived from its ID
pub fn node(id: &str) -> Node {
    Node::new(id, format!("{id}.fred.local:9001"))
}

/// Build a clock from `(node, counter)` pairs
pub fn clock(entries: &[(&str, u64)]) -> VectorClock {
    entries.iter().map(|&(node, counter)| (node, counter)).collect()
}

/// Store service for `node_id` on a fresh memory store
pub fn memory_store_service(node_id: &str) -> (Arc<MemoryStore>, StoreService) {
    let backend = Arc::new(MemoryStore::new());
    let service = StoreService::new(node_id, backend.clone());
    (backend, service)
}
