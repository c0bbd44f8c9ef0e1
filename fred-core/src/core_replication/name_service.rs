//! Name Service
//!
//! Durable, cluster-wide record of which nodes exist and which nodes are
//! declared members of which keygroup. The replication service keeps a
//! runtime view of the same facts and can be seeded from here.

use crate::core_types::{Expiry, FredError, FredResult, KeygroupName, Node, NodeId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait NameService: Send + Sync {
    async fn register_node(&self, node: &Node) -> FredResult<()>;

    async fn unregister_node(&self, id: &str) -> FredResult<()>;

    async fn get_node(&self, id: &str) -> FredResult<Node>;

    async fn get_nodes(&self) -> FredResult<Vec<Node>>;

    /// Declare a keygroup with `creator` as its first member.
    ///
    /// Recreating a previously deleted name starts from an empty membership.
    async fn create_keygroup(
        &self,
        keygroup: &KeygroupName,
        mutable: bool,
        expiry: Expiry,
        creator: &str,
    ) -> FredResult<()>;

    async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()>;

    async fn exists_keygroup(&self, keygroup: &KeygroupName) -> FredResult<bool>;

    async fn is_mutable(&self, keygroup: &KeygroupName) -> FredResult<bool>;

    /// Expiry that `node` applies to rows of `keygroup`.
    async fn get_expiry(&self, keygroup: &KeygroupName, node: &str) -> FredResult<Expiry>;

    async fn join_keygroup(
        &self,
        keygroup: &KeygroupName,
        node: &str,
        expiry: Expiry,
    ) -> FredResult<()>;

    async fn exit_keygroup(&self, keygroup: &KeygroupName, node: &str) -> FredResult<()>;

    /// Declared members and their expiry
    async fn get_keygroup_members(
        &self,
        keygroup: &KeygroupName,
    ) -> FredResult<HashMap<NodeId, Expiry>>;

    async fn get_keygroups(&self) -> FredResult<Vec<KeygroupName>>;
}

#[derive(Debug, Clone)]
struct KeygroupRecord {
    deleted: bool,
    mutable: bool,
    members: HashMap<NodeId, Expiry>,
}

#[derive(Debug, Default)]
struct Registry {
    nodes: HashMap<NodeId, Node>,
    keygroups: HashMap<KeygroupName, KeygroupRecord>,
}

impl Registry {
    fn active(&self, keygroup: &KeygroupName) -> FredResult<&KeygroupRecord> {
        self.keygroups
            .get(keygroup)
            .filter(|record| !record.deleted)
            .ok_or_else(|| FredError::NotFound(format!("keygroup {keygroup}")))
    }

    fn active_mut(&mut self, keygroup: &KeygroupName) -> FredResult<&mut KeygroupRecord> {
        self.keygroups
            .get_mut(keygroup)
            .filter(|record| !record.deleted)
            .ok_or_else(|| FredError::NotFound(format!("keygroup {keygroup}")))
    }
}

fn not_a_member(keygroup: &KeygroupName, node: &str) -> FredError {
    FredError::NotFound(format!("node {node} is not a member of {keygroup}"))
}

/// Name service kept in process memory.
///
/// Deleting a keygroup only marks it deleted and leaves its member entries
/// behind, the way a key-value backed registry does; recreation purges them.
#[derive(Debug, Default)]
pub struct MemoryNameService {
    registry: RwLock<Registry>,
}

impl MemoryNameService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NameService for MemoryNameService {
    async fn register_node(&self, node: &Node) -> FredResult<()> {
        self.registry.write().await.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn unregister_node(&self, id: &str) -> FredResult<()> {
        let mut registry = self.registry.write().await;
        registry
            .nodes
            .remove(id)
            .ok_or_else(|| FredError::NotFound(format!("node {id}")))?;
        for record in registry.keygroups.values_mut() {
            record.members.remove(id);
        }
        Ok(())
    }

    async fn get_node(&self, id: &str) -> FredResult<Node> {
        self.registry
            .read()
            .await
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| FredError::NotFound(format!("node {id}")))
    }

    async fn get_nodes(&self) -> FredResult<Vec<Node>> {
        Ok(self.registry.read().await.nodes.values().cloned().collect())
    }

    async fn create_keygroup(
        &self,
        keygroup: &KeygroupName,
        mutable: bool,
        expiry: Expiry,
        creator: &str,
    ) -> FredResult<()> {
        let mut registry = self.registry.write().await;
        if registry.keygroups.get(keygroup).is_some_and(|record| !record.deleted) {
            return Err(FredError::Conflict(format!("keygroup {keygroup} already exists")));
        }
        let record = KeygroupRecord {
            deleted: false,
            mutable,
            members: HashMap::from([(creator.to_string(), expiry)]),
        };
        registry.keygroups.insert(keygroup.clone(), record);
        Ok(())
    }

    async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        let mut registry = self.registry.write().await;
        registry.active_mut(keygroup)?.deleted = true;
        Ok(())
    }

    async fn exists_keygroup(&self, keygroup: &KeygroupName) -> FredResult<bool> {
        Ok(self.registry.read().await.active(keygroup).is_ok())
    }

    async fn is_mutable(&self, keygroup: &KeygroupName) -> FredResult<bool> {
        Ok(self.registry.read().await.active(keygroup)?.mutable)
    }

    async fn get_expiry(&self, keygroup: &KeygroupName, node: &str) -> FredResult<Expiry> {
        let registry = self.registry.read().await;
        registry
            .active(keygroup)?
            .members
            .get(node)
            .copied()
            .ok_or_else(|| not_a_member(keygroup, node))
    }

    async fn join_keygroup(
        &self,
        keygroup: &KeygroupName,
        node: &str,
        expiry: Expiry,
    ) -> FredResult<()> {
        let mut registry = self.registry.write().await;
        if !registry.nodes.contains_key(node) {
            return Err(FredError::NotFound(format!("node {node}")));
        }
        let record = registry.active_mut(keygroup)?;
        if record.members.contains_key(node) {
            return Err(FredError::Conflict(format!(
                "node {node} is already a member of {keygroup}"
            )));
        }
        record.members.insert(node.to_string(), expiry);
        Ok(())
    }

    async fn exit_keygroup(&self, keygroup: &KeygroupName, node: &str) -> FredResult<()> {
        let mut registry = self.registry.write().await;
        registry
            .active_mut(keygroup)?
            .members
            .remove(node)
            .map(|_| ())
            .ok_or_else(|| not_a_member(keygroup, node))
    }

    async fn get_keygroup_members(
        &self,
        keygroup: &KeygroupName,
    ) -> FredResult<HashMap<NodeId, Expiry>> {
        Ok(self.registry.read().await.active(keygroup)?.members.clone())
    }

    async fn get_keygroups(&self) -> FredResult<Vec<KeygroupName>> {
        let registry = self.registry.read().await;
        Ok(registry
            .keygroups
            .iter()
            .filter(|(_, record)| !record.deleted)
            .map(|(name, _)| name.clone())
            .collect())
    }
}
