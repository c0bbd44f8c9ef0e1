/*
    replication_service.rs - Replica membership and fan-out

    Keeps this node's view of
    - which peers exist (node table)
    - which peers hold a copy of which keygroup (replica sets)
    and drives the protocols that change them. The local node is implicit:
    it is never stored in its own node table or replica sets.

    Locks guard the in-memory tables only. Every network call happens after
    the needed state has been copied out, so a slow peer stalls the calling
    request but never the tables. There are no retries here: the first
    failing peer aborts the fan-out and its error goes back to the caller.
*/

use super::client::Client;
use super::name_service::NameService;
use crate::core_types::{
    Expiry, FredError, FredResult, Item, KeygroupName, Node, NodeId, VectorClock,
};
use crate::metrics::{REPLICATION_RELAYS, REPLICATION_RELAY_FAILURES};
use metrics::counter;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Replica set of one keygroup, as seen by this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keygroup {
    pub name: KeygroupName,
    pub replicas: BTreeSet<NodeId>,
}

impl Keygroup {
    fn new(name: KeygroupName) -> Self {
        Self { name, replicas: BTreeSet::new() }
    }
}

fn track(target: &Node, result: FredResult<()>) -> FredResult<()> {
    match result {
        Ok(()) => {
            counter!(REPLICATION_RELAYS).increment(1);
            Ok(())
        }
        Err(e) => {
            counter!(REPLICATION_RELAY_FAILURES).increment(1);
            warn!(node = %target.id, "Request to peer failed: {e}");
            Err(e)
        }
    }
}

pub struct ReplicationService {
    own: Node,
    client: Arc<dyn Client>,
    nodes: RwLock<HashMap<NodeId, Node>>,
    keygroups: RwLock<HashMap<KeygroupName, Keygroup>>,
}

impl ReplicationService {
    pub fn new(own: Node, client: Arc<dyn Client>) -> Self {
        Self {
            own,
            client,
            nodes: RwLock::new(HashMap::new()),
            keygroups: RwLock::new(HashMap::new()),
        }
    }

    pub fn own_node(&self) -> &Node {
        &self.own
    }

    /// Load known nodes and this node's keygroup memberships from `ns`.
    ///
    /// Keygroups this node is not a declared member of are skipped.
    pub async fn seed_from_name_service(&self, ns: &dyn NameService) -> FredResult<()> {
        let nodes = ns.get_nodes().await?;
        let mut seeded = Vec::new();
        for name in ns.get_keygroups().await? {
            let members = ns.get_keygroup_members(&name).await?;
            if !members.contains_key(&self.own.id) {
                continue;
            }
            let mut keygroup = Keygroup::new(name.clone());
            keygroup.replicas = members.into_keys().filter(|id| *id != self.own.id).collect();
            seeded.push(keygroup);
        }

        {
            let mut table = self.nodes.write().await;
            for node in nodes.into_iter().filter(|n| n.id != self.own.id) {
                table.insert(node.id.clone(), node);
            }
        }
        let mut keygroups = self.keygroups.write().await;
        for keygroup in seeded {
            keygroups.insert(keygroup.name.clone(), keygroup);
        }
        info!(keygroups = keygroups.len(), "Seeded replication state from name service");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Keygroup bookkeeping
    // ---------------------------------------------------------------------

    /// Start tracking a keygroup with no peer replicas. No-op if tracked.
    pub async fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        let mut keygroups = self.keygroups.write().await;
        if !keygroups.contains_key(keygroup) {
            keygroups.insert(keygroup.clone(), Keygroup::new(keygroup.clone()));
            debug!(keygroup = %keygroup, "Tracking keygroup");
        }
        Ok(())
    }

    pub async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.keygroups
            .write()
            .await
            .remove(keygroup)
            .map(|_| ())
            .ok_or_else(|| FredError::NotFound(format!("keygroup {keygroup}")))
    }

    pub async fn exists_keygroup(&self, keygroup: &KeygroupName) -> bool {
        self.keygroups.read().await.contains_key(keygroup)
    }

    async fn replica_ids(&self, keygroup: &KeygroupName) -> FredResult<BTreeSet<NodeId>> {
        self.keygroups
            .read()
            .await
            .get(keygroup)
            .map(|kg| kg.replicas.clone())
            .ok_or_else(|| FredError::NotFound(format!("keygroup {keygroup}")))
    }

    async fn resolve(&self, ids: &BTreeSet<NodeId>) -> FredResult<Vec<Node>> {
        let nodes = self.nodes.read().await;
        ids.iter()
            .map(|id| {
                nodes.get(id).cloned().ok_or_else(|| FredError::NotFound(format!("node {id}")))
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Relay
    // ---------------------------------------------------------------------

    /// Ask every peer replica to drop `keygroup`.
    pub async fn relay_delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        let targets = self.get_replica(keygroup).await?;
        for node in &targets {
            track(node, self.client.send_delete_keygroup(node, keygroup).await)?;
        }
        debug!(keygroup = %keygroup, peers = targets.len(), "Relayed keygroup deletion");
        Ok(())
    }

    /// Send a locally accepted version to every peer replica.
    pub async fn relay_update(&self, item: &Item) -> FredResult<()> {
        let targets = self.get_replica(&item.keygroup).await?;
        for node in &targets {
            track(node, self.client.send_update(node, item).await)?;
        }
        debug!(keygroup = %item.keygroup, id = %item.id, peers = targets.len(), "Relayed update");
        Ok(())
    }

    /// Send a locally accepted tombstone to every peer replica.
    pub async fn relay_delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()> {
        let targets = self.get_replica(keygroup).await?;
        for node in &targets {
            track(node, self.client.send_delete(node, keygroup, id, version).await)?;
        }
        debug!(keygroup = %keygroup, id = %id, peers = targets.len(), "Relayed delete");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Replicas
    // ---------------------------------------------------------------------

    /// Admit `node_id` as a replica of `keygroup`.
    ///
    /// With `relay` set, this node drives the bootstrap: the new node creates
    /// the keygroup, learns about every existing replica (this one included),
    /// every existing peer replica learns about it, and it receives `items`.
    /// The new node is recorded locally only once all of that succeeded. A
    /// failure part-way returns the error and leaves peers partially
    /// informed; nothing is rolled back.
    ///
    /// Without `relay` the protocol already ran elsewhere and only the local
    /// record changes.
    pub async fn add_replica(
        &self,
        keygroup: &KeygroupName,
        node_id: &str,
        items: &[Item],
        expiry: Expiry,
        relay: bool,
    ) -> FredResult<()> {
        if node_id == self.own.id {
            debug!(keygroup = %keygroup, "Ignoring request to add this node as its own replica");
            return Ok(());
        }

        let existing = self.replica_ids(keygroup).await?;
        if existing.contains(node_id) {
            return Err(FredError::Conflict(format!(
                "node {node_id} already replicates {keygroup}"
            )));
        }
        let new_node = self.get_node(node_id).await?;

        if relay {
            let peers = self.resolve(&existing).await?;
            if let Err(e) = self.bootstrap(keygroup, &new_node, &peers, items, expiry).await {
                warn!(
                    keygroup = %keygroup, node = %new_node.id,
                    "Replica bootstrap aborted, peers may be partially informed: {e}"
                );
                return Err(e);
            }
        }

        let mut keygroups = self.keygroups.write().await;
        let record = keygroups
            .get_mut(keygroup)
            .ok_or_else(|| FredError::NotFound(format!("keygroup {keygroup}")))?;
        if !record.replicas.insert(new_node.id.clone()) {
            return Err(FredError::Conflict(format!(
                "node {node_id} already replicates {keygroup}"
            )));
        }
        info!(keygroup = %keygroup, node = %new_node.id, relay, "Added replica");
        Ok(())
    }

    async fn bootstrap(
        &self,
        keygroup: &KeygroupName,
        new_node: &Node,
        peers: &[Node],
        items: &[Item],
        expiry: Expiry,
    ) -> FredResult<()> {
        track(new_node, self.client.send_create_keygroup(new_node, keygroup, expiry).await)?;
        track(new_node, self.client.send_add_replica(new_node, keygroup, &self.own.id).await)?;

        for peer in peers {
            track(peer, self.client.send_add_replica(peer, keygroup, &new_node.id).await)?;
            track(new_node, self.client.send_add_replica(new_node, keygroup, &peer.id).await)?;
        }

        for item in items {
            let sent = if item.tombstoned {
                self.client.send_delete(new_node, keygroup, &item.id, &item.version).await
            } else {
                self.client.send_update(new_node, item).await
            };
            track(new_node, sent)?;
        }

        debug!(
            keygroup = %keygroup, node = %new_node.id, items = items.len(),
            "Bootstrapped replica"
        );
        Ok(())
    }

    /// Remove `node_id` from the replicas of `keygroup`.
    ///
    /// With `relay` set, the removed node is told to delete its copy and
    /// every remaining peer replica is told to forget it.
    pub async fn remove_replica(
        &self,
        keygroup: &KeygroupName,
        node_id: &str,
        relay: bool,
    ) -> FredResult<()> {
        if node_id == self.own.id {
            return Err(FredError::InvalidArgument(format!(
                "cannot remove this node from {keygroup}, delete the keygroup instead"
            )));
        }

        let existing = self.replica_ids(keygroup).await?;
        if !existing.contains(node_id) {
            return Err(FredError::NotFound(format!(
                "node {node_id} does not replicate {keygroup}"
            )));
        }
        let removed = self.get_node(node_id).await?;
        let remaining: BTreeSet<NodeId> = existing.into_iter().filter(|id| id != node_id).collect();
        let peers = if relay { self.resolve(&remaining).await? } else { Vec::new() };

        {
            let mut keygroups = self.keygroups.write().await;
            if let Some(record) = keygroups.get_mut(keygroup) {
                record.replicas.remove(node_id);
            }
        }
        info!(keygroup = %keygroup, node = %node_id, relay, "Removed replica");

        if relay {
            track(&removed, self.client.send_delete_keygroup(&removed, keygroup).await)?;
            for peer in &peers {
                track(peer, self.client.send_remove_replica(peer, keygroup, &removed.id).await)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    /// Learn about a node.
    ///
    /// With `relay` set, the new node also learns about this node and every
    /// known node, and every known node learns about it.
    pub async fn add_node(&self, node: &Node, relay: bool) -> FredResult<()> {
        if node.id == self.own.id {
            debug!("Ignoring request to add this node to its own node table");
            return Ok(());
        }
        if self.nodes.read().await.contains_key(&node.id) {
            return Err(FredError::Conflict(format!("node {} is already known", node.id)));
        }

        if relay {
            let known = self.get_nodes().await?;
            track(node, self.client.send_add_node(node, &self.own).await)?;
            for peer in &known {
                track(peer, self.client.send_add_node(peer, node).await)?;
                track(node, self.client.send_add_node(node, peer).await)?;
            }
        }

        self.nodes.write().await.insert(node.id.clone(), node.clone());
        info!(node = %node, relay, "Added node");
        Ok(())
    }

    /// Forget a node and drop it from every replica set.
    ///
    /// With `relay` set, every other known node is told to forget it too.
    pub async fn remove_node(&self, node_id: &str, relay: bool) -> FredResult<()> {
        if node_id == self.own.id {
            return Err(FredError::InvalidArgument(
                "cannot remove this node from its own node table".to_string(),
            ));
        }

        let removed_id: NodeId = {
            let mut nodes = self.nodes.write().await;
            nodes
                .remove(node_id)
                .map(|node| node.id)
                .ok_or_else(|| FredError::NotFound(format!("node {node_id}")))?
        };
        {
            let mut keygroups = self.keygroups.write().await;
            for record in keygroups.values_mut() {
                record.replicas.remove(node_id);
            }
        }
        info!(node = %node_id, relay, "Removed node");

        if relay {
            for peer in &self.get_nodes().await? {
                track(peer, self.client.send_remove_node(peer, &removed_id).await)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub async fn get_node(&self, node_id: &str) -> FredResult<Node> {
        if node_id == self.own.id {
            return Ok(self.own.clone());
        }
        self.nodes
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| FredError::NotFound(format!("node {node_id}")))
    }

    /// Every known peer, sorted by ID
    pub async fn get_nodes(&self) -> FredResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    /// Peer replicas of a keygroup, sorted by ID
    pub async fn get_replica(&self, keygroup: &KeygroupName) -> FredResult<Vec<Node>> {
        let ids = self.replica_ids(keygroup).await?;
        self.resolve(&ids).await
    }

    /// Keygroups this node holds
    pub async fn get_keygroups(&self) -> Vec<KeygroupName> {
        let mut names: Vec<KeygroupName> = self.keygroups.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
