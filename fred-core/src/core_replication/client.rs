//! Peer Transport Trait
//!
//! One call per relay or bootstrap step. Every call is addressed to a
//! [`Node`], blocks until the peer has applied the request, and fails on
//! transport errors as well as on errors reported by the peer. Timeouts and
//! retries belong to the implementation; the replication service performs
//! none.

use crate::core_types::{Expiry, FredResult, Item, KeygroupName, Node, NodeId, VectorClock};
use async_trait::async_trait;

#[async_trait]
pub trait Client: Send + Sync {
    /// Ask `node` to create `keygroup` locally.
    async fn send_create_keygroup(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        expiry: Expiry,
    ) -> FredResult<()>;

    /// Ask `node` to drop its copy of `keygroup`.
    async fn send_delete_keygroup(&self, node: &Node, keygroup: &KeygroupName) -> FredResult<()>;

    /// Hand `node` a version this node already accepted.
    async fn send_update(&self, node: &Node, item: &Item) -> FredResult<()>;

    /// Hand `node` a tombstone this node already accepted.
    async fn send_delete(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()>;

    /// Tell `node` that `new_node` exists.
    async fn send_add_node(&self, node: &Node, new_node: &Node) -> FredResult<()>;

    /// Tell `node` that `removed` left the cluster.
    async fn send_remove_node(&self, node: &Node, removed: &NodeId) -> FredResult<()>;

    /// Tell `node` that `replica` now holds `keygroup`.
    async fn send_add_replica(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        replica: &NodeId,
    ) -> FredResult<()>;

    /// Tell `node` that `replica` no longer holds `keygroup`.
    async fn send_remove_replica(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        replica: &NodeId,
    ) -> FredResult<()>;
}
