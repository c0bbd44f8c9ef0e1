//! In-process cluster
//!
//! Every node gets its own store, replication service and handlers. Peer
//! requests go straight to the target's [`InternalHandler`]; a node can be
//! marked unreachable to simulate a partition.

use crate::core_handler::{ExternalHandler, InternalHandler};
use crate::core_replication::{Client, MemoryNameService, NameService, ReplicationService};
use crate::core_store::{MemoryStore, StoreService};
use crate::core_types::{
    Expiry, FredError, FredResult, Item, KeygroupName, Node, NodeId, VectorClock,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

type Registry = Arc<RwLock<HashMap<NodeId, Arc<InternalHandler>>>>;

/// Client that calls the target node's internal handler directly
#[derive(Default)]
pub struct LoopbackClient {
    handlers: Registry,
    unreachable: RwLock<HashSet<NodeId>>,
}

impl LoopbackClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: &str, handler: Arc<InternalHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.to_string(), handler);
    }

    pub fn set_reachable(&self, node_id: &str, reachable: bool) {
        let mut unreachable = self.unreachable.write().unwrap_or_else(PoisonError::into_inner);
        if reachable {
            unreachable.remove(node_id);
        } else {
            unreachable.insert(node_id.to_string());
        }
    }

    fn target(&self, node: &Node) -> FredResult<Arc<InternalHandler>> {
        if self.unreachable.read().unwrap_or_else(PoisonError::into_inner).contains(&node.id) {
            return Err(FredError::transport(&node.id, "node unreachable"));
        }
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node.id)
            .cloned()
            .ok_or_else(|| FredError::transport(&node.id, "no such node"))
    }
}

#[async_trait]
impl Client for LoopbackClient {
    async fn send_create_keygroup(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        expiry: Expiry,
    ) -> FredResult<()> {
        self.target(node)?.create_keygroup(keygroup, expiry).await
    }

    async fn send_delete_keygroup(&self, node: &Node, keygroup: &KeygroupName) -> FredResult<()> {
        self.target(node)?.delete_keygroup(keygroup).await
    }

    async fn send_update(&self, node: &Node, item: &Item) -> FredResult<()> {
        self.target(node)?.update(item).await
    }

    async fn send_delete(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()> {
        self.target(node)?.delete(keygroup, id, version).await
    }

    async fn send_add_node(&self, node: &Node, new_node: &Node) -> FredResult<()> {
        self.target(node)?.add_node(new_node).await
    }

    async fn send_remove_node(&self, node: &Node, removed: &NodeId) -> FredResult<()> {
        self.target(node)?.remove_node(removed).await
    }

    async fn send_add_replica(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        replica: &NodeId,
    ) -> FredResult<()> {
        self.target(node)?.add_replica(keygroup, replica).await
    }

    async fn send_remove_replica(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        replica: &NodeId,
    ) -> FredResult<()> {
        self.target(node)?.remove_replica(keygroup, replica).await
    }
}

/// One member of a [`LoopbackCluster`]
pub struct ClusterNode {
    pub node: Node,
    pub backend: Arc<MemoryStore>,
    pub store: Arc<StoreService>,
    pub replication: Arc<ReplicationService>,
    pub external: Arc<ExternalHandler>,
    pub internal: Arc<InternalHandler>,
}

/// Nodes sharing one name service and one loopback client
pub struct LoopbackCluster {
    pub client: Arc<LoopbackClient>,
    pub name_service: Arc<MemoryNameService>,
    nodes: HashMap<NodeId, ClusterNode>,
}

impl LoopbackCluster {
    /// Start the given nodes. They are registered with the name service but
    /// do not know each other yet; use `ExternalHandler::add_node` or
    /// [`LoopbackCluster::connect_all`].
    pub async fn start(ids: &[&str]) -> FredResult<Self> {
        let client = Arc::new(LoopbackClient::new());
        let name_service = Arc::new(MemoryNameService::new());
        let mut nodes = HashMap::new();

        for id in ids {
            let node = super::fixtures::node(id);
            name_service.register_node(&node).await?;

            let backend = Arc::new(MemoryStore::new());
            let store = Arc::new(StoreService::new(node.id.clone(), backend.clone()));
            let replication = Arc::new(ReplicationService::new(node.clone(), client.clone()));
            let external = Arc::new(ExternalHandler::new(
                store.clone(),
                replication.clone(),
                name_service.clone(),
            ));
            let internal = Arc::new(InternalHandler::new(
                store.clone(),
                replication.clone(),
                name_service.clone(),
            ));
            client.register(&node.id, internal.clone());

            let member = ClusterNode { node, backend, store, replication, external, internal };
            nodes.insert(member.node.id.clone(), member);
        }

        Ok(Self { client, name_service, nodes })
    }

    /// Introduce every node to every other one through the first node.
    pub async fn connect_all(&self, ids: &[&str]) -> FredResult<()> {
        if let Some((first, rest)) = ids.split_first() {
            let entry = self.node(first)?;
            for id in rest {
                entry.external.add_node(&self.node(id)?.node).await?;
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> FredResult<&ClusterNode> {
        self.nodes.get(id).ok_or_else(|| FredError::NotFound(format!("node {id}")))
    }

    /// External handler of `id`; panics on unknown IDs
    pub fn external(&self, id: &str) -> &ExternalHandler {
        match self.nodes.get(id) {
            Some(node) => &node.external,
            None => panic!("no node {id} in cluster"),
        }
    }
}
