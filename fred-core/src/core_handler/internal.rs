//! Peer-facing request handling
//!
//! Requests arrive from the node that already applied them. Versions are
//! admitted as-is (no local tick) and membership changes are recorded
//! without relaying, so a message never travels further than one hop.

use super::member_expiry;
use crate::core_replication::{NameService, ReplicationService};
use crate::core_store::StoreService;
use crate::core_types::{Expiry, FredResult, Item, KeygroupName, Node, NodeId, VectorClock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct InternalHandler {
    store: Arc<StoreService>,
    replication: Arc<ReplicationService>,
    name_service: Arc<dyn NameService>,
    // Expiry announced by the node that created a keygroup here. Used until
    // this node shows up as a member in the name service.
    announced: RwLock<HashMap<KeygroupName, Expiry>>,
}

impl InternalHandler {
    pub fn new(
        store: Arc<StoreService>,
        replication: Arc<ReplicationService>,
        name_service: Arc<dyn NameService>,
    ) -> Self {
        Self { store, replication, name_service, announced: RwLock::new(HashMap::new()) }
    }

    /// Create the keygroup locally unless it already exists, remembering the
    /// expiry the sender wants this node to apply.
    pub async fn create_keygroup(&self, keygroup: &KeygroupName, expiry: Expiry) -> FredResult<()> {
        if !self.store.exists_keygroup(keygroup).await? {
            self.store.create_keygroup(keygroup).await?;
        }
        self.announced.write().await.insert(keygroup.clone(), expiry);
        self.replication.create_keygroup(keygroup).await
    }

    pub async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.announced.write().await.remove(keygroup);
        if self.store.exists_keygroup(keygroup).await? {
            self.store.delete_keygroup(keygroup).await?;
        }
        if self.replication.exists_keygroup(keygroup).await {
            self.replication.delete_keygroup(keygroup).await?;
        }
        Ok(())
    }

    pub async fn update(&self, item: &Item) -> FredResult<()> {
        let announced = self.announced.read().await.get(&item.keygroup).copied().flatten();
        let own = self.store.node_id();
        let expiry =
            member_expiry(self.name_service.as_ref(), &item.keygroup, own, announced).await?;
        let admitted = self.store.add_version(item, expiry).await?;
        debug!(keygroup = %item.keygroup, id = %item.id, admitted, "Handled peer update");
        Ok(())
    }

    pub async fn delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()> {
        let tombstone = Item::tombstone(keygroup.clone(), id).with_version(version.clone());
        let admitted = self.store.add_version(&tombstone, None).await?;
        debug!(keygroup = %keygroup, id = %id, admitted, "Handled peer delete");
        Ok(())
    }

    pub async fn add_replica(&self, keygroup: &KeygroupName, node_id: &NodeId) -> FredResult<()> {
        self.replication.add_replica(keygroup, node_id, &[], None, false).await
    }

    pub async fn remove_replica(
        &self,
        keygroup: &KeygroupName,
        node_id: &NodeId,
    ) -> FredResult<()> {
        self.replication.remove_replica(keygroup, node_id, false).await
    }

    pub async fn add_node(&self, node: &Node) -> FredResult<()> {
        self.replication.add_node(node, false).await
    }

    pub async fn remove_node(&self, node_id: &NodeId) -> FredResult<()> {
        self.replication.remove_node(node_id, false).await
    }
}
