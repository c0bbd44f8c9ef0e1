//! Client-facing request handling
//!
//! Every mutating call runs in the same order: validate against the name
//! service, apply to the local store, relay to peer replicas, and finally
//! update the durable membership record. A relay failure is returned to the
//! caller after the local write already took effect.

use super::member_expiry;
use crate::core_replication::{NameService, ReplicationService};
use crate::core_store::StoreService;
use crate::core_types::{
    Expiry, FredError, FredResult, Item, KeygroupName, Node, Trigger, VectorClock,
};
use std::sync::Arc;
use tracing::info;

pub struct ExternalHandler {
    store: Arc<StoreService>,
    replication: Arc<ReplicationService>,
    name_service: Arc<dyn NameService>,
    default_expiry: Expiry,
}

impl ExternalHandler {
    pub fn new(
        store: Arc<StoreService>,
        replication: Arc<ReplicationService>,
        name_service: Arc<dyn NameService>,
    ) -> Self {
        Self { store, replication, name_service, default_expiry: None }
    }

    /// Expiry for keygroups created without one
    pub fn with_default_expiry(mut self, expiry: Expiry) -> Self {
        self.default_expiry = expiry;
        self
    }

    fn own_id(&self) -> &str {
        &self.replication.own_node().id
    }

    async fn require_mutability(&self, keygroup: &KeygroupName, mutable: bool) -> FredResult<()> {
        if self.name_service.is_mutable(keygroup).await? == mutable {
            return Ok(());
        }
        let (kind, op) =
            if mutable { ("immutable", "update or delete") } else { ("mutable", "append to") };
        Err(FredError::InvalidArgument(format!("cannot {op} {kind} keygroup {keygroup}")))
    }

    // ---------------------------------------------------------------------
    // Keygroups
    // ---------------------------------------------------------------------

    pub async fn create_keygroup(
        &self,
        keygroup: &KeygroupName,
        mutable: bool,
        expiry: Expiry,
    ) -> FredResult<()> {
        let expiry = expiry.or(self.default_expiry);
        self.name_service.create_keygroup(keygroup, mutable, expiry, self.own_id()).await?;
        self.store.create_keygroup(keygroup).await?;
        self.replication.create_keygroup(keygroup).await?;
        info!(keygroup = %keygroup, mutable, "Keygroup ready");
        Ok(())
    }

    /// Peers drop their copy first, so after a failed relay this node still
    /// holds the keygroup and the call can be retried.
    pub async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.replication.relay_delete_keygroup(keygroup).await?;
        self.store.delete_keygroup(keygroup).await?;
        self.replication.delete_keygroup(keygroup).await?;
        self.name_service.delete_keygroup(keygroup).await
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Live versions of an item, tombstones included
    pub async fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        self.store.read(keygroup, id).await
    }

    pub async fn read_version(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<Vec<Item>> {
        self.store.read_version(keygroup, id, version).await
    }

    pub async fn scan(
        &self,
        keygroup: &KeygroupName,
        from_id: &str,
        count: usize,
    ) -> FredResult<Vec<Item>> {
        self.store.scan(keygroup, from_id, count).await
    }

    pub async fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>> {
        self.store.read_all(keygroup).await
    }

    pub async fn keys(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>> {
        self.store.keys(keygroup).await
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Write `val` under `id`. `known` lists the versions the caller read;
    /// leave it empty to supersede whatever is live.
    pub async fn update(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        val: &[u8],
        known: &[VectorClock],
    ) -> FredResult<VectorClock> {
        self.require_mutability(keygroup, true).await?;
        let expiry =
            member_expiry(self.name_service.as_ref(), keygroup, self.own_id(), None).await?;

        let item = Item::new(keygroup.clone(), id, val);
        let version = self.store.update_versions(&item, known, expiry).await?;
        self.replication.relay_update(&item.with_version(version.clone())).await?;
        Ok(version)
    }

    pub async fn delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        known: &[VectorClock],
    ) -> FredResult<VectorClock> {
        self.require_mutability(keygroup, true).await?;
        let version = self.store.tombstone_versions(keygroup, id, known).await?;
        self.replication.relay_delete(keygroup, id, &version).await?;
        Ok(version)
    }

    /// Append to an immutable keygroup; returns the minted ID.
    pub async fn append(&self, keygroup: &KeygroupName, val: &[u8]) -> FredResult<String> {
        self.require_mutability(keygroup, false).await?;
        let expiry =
            member_expiry(self.name_service.as_ref(), keygroup, self.own_id(), None).await?;

        let item = self.store.append(keygroup, val, expiry).await?;
        self.replication.relay_update(&item).await?;
        Ok(item.id)
    }

    // ---------------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------------

    /// Make `node_id` a replica of `keygroup` and bootstrap it with every
    /// live version this node holds.
    pub async fn add_replica(
        &self,
        keygroup: &KeygroupName,
        node_id: &str,
        expiry: Expiry,
    ) -> FredResult<()> {
        let items = self.store.read_all(keygroup).await?;
        self.replication.add_replica(keygroup, node_id, &items, expiry, true).await?;
        if node_id == self.own_id() {
            return Ok(());
        }
        self.name_service.join_keygroup(keygroup, node_id, expiry).await
    }

    pub async fn remove_replica(&self, keygroup: &KeygroupName, node_id: &str) -> FredResult<()> {
        self.replication.remove_replica(keygroup, node_id, true).await?;
        self.name_service.exit_keygroup(keygroup, node_id).await
    }

    pub async fn add_node(&self, node: &Node) -> FredResult<()> {
        self.replication.add_node(node, true).await?;
        self.name_service.register_node(node).await
    }

    pub async fn remove_node(&self, node_id: &str) -> FredResult<()> {
        self.replication.remove_node(node_id, true).await?;
        self.name_service.unregister_node(node_id).await
    }

    pub async fn get_replica(&self, keygroup: &KeygroupName) -> FredResult<Vec<Node>> {
        self.replication.get_replica(keygroup).await
    }

    pub async fn get_node(&self, node_id: &str) -> FredResult<Node> {
        self.replication.get_node(node_id).await
    }

    pub async fn get_nodes(&self) -> FredResult<Vec<Node>> {
        self.replication.get_nodes().await
    }

    // ---------------------------------------------------------------------
    // Triggers
    // ---------------------------------------------------------------------

    pub async fn add_trigger(&self, keygroup: &KeygroupName, trigger: &Trigger) -> FredResult<()> {
        self.store.add_trigger(keygroup, trigger).await
    }

    pub async fn delete_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger_id: &str,
    ) -> FredResult<()> {
        self.store.delete_trigger(keygroup, trigger_id).await
    }

    pub async fn get_triggers(&self, keygroup: &KeygroupName) -> FredResult<Vec<Trigger>> {
        self.store.get_triggers(keygroup).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_replication::MemoryNameService;
    use crate::test_utils::{clock, keygroup, memory_store_service, node, Call, RecordingClient};
    use std::time::Duration;

    async fn handler() -> (Arc<RecordingClient>, Arc<MemoryNameService>, ExternalHandler) {
        let client = Arc::new(RecordingClient::new());
        let ns = Arc::new(MemoryNameService::new());
        ns.register_node(&node("A")).await.unwrap();
        ns.register_node(&node("B")).await.unwrap();

        let (_backend, store) = memory_store_service("A");
        let replication = Arc::new(ReplicationService::new(node("A"), client.clone()));
        let handler = ExternalHandler::new(Arc::new(store), replication, ns.clone())
            .with_default_expiry(Some(Duration::from_secs(300)));
        (client, ns, handler)
    }

    #[tokio::test]
    async fn test_default_expiry_applies_to_new_keygroups() {
        let (_client, ns, handler) = handler().await;
        let kg = keygroup("kg");
        handler.create_keygroup(&kg, true, None).await.unwrap();
        assert_eq!(ns.get_expiry(&kg, "A").await.unwrap(), Some(Duration::from_secs(300)));

        let explicit = keygroup("short");
        handler.create_keygroup(&explicit, true, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(ns.get_expiry(&explicit, "A").await.unwrap(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_local_write_survives_relay_failure() {
        let (client, _ns, handler) = handler().await;
        let kg = keygroup("kg");
        handler.create_keygroup(&kg, true, None).await.unwrap();
        handler.add_node(&node("B")).await.unwrap();
        handler.add_replica(&kg, "B", None).await.unwrap();

        client.fail_when(|call| matches!(call, Call::Update { .. }));
        let err = handler.update(&kg, "x", b"v", &[]).await.unwrap_err();
        assert!(matches!(err, FredError::Transport { .. }));

        let items = handler.read(&kg, "x").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].version, clock(&[("A", 1)]));
    }

    #[tokio::test]
    async fn test_create_existing_keygroup_conflicts() {
        let (client, _ns, handler) = handler().await;
        let kg = keygroup("kg");
        handler.create_keygroup(&kg, true, None).await.unwrap();
        assert!(handler.create_keygroup(&kg, false, None).await.unwrap_err().is_conflict());
        assert!(client.calls().is_empty());
    }
}
