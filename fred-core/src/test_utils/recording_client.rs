//! Peer client that records every request instead of sending it

use crate::core_replication::Client;
use crate::core_types::{
    Expiry, FredError, FredResult, Item, KeygroupName, Node, NodeId, VectorClock,
};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// One request as the replication service issued it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateKeygroup { to: NodeId, keygroup: KeygroupName },
    DeleteKeygroup { to: NodeId, keygroup: KeygroupName },
    Update { to: NodeId, item: Item },
    Delete { to: NodeId, keygroup: KeygroupName, id: String, version: VectorClock },
    AddNode { to: NodeId, node: NodeId },
    RemoveNode { to: NodeId, node: NodeId },
    AddReplica { to: NodeId, keygroup: KeygroupName, replica: NodeId },
    RemoveReplica { to: NodeId, keygroup: KeygroupName, replica: NodeId },
}

impl Call {
    /// Node the request was addressed to
    pub fn to(&self) -> &str {
        match self {
            Call::CreateKeygroup { to, .. }
            | Call::DeleteKeygroup { to, .. }
            | Call::Update { to, .. }
            | Call::Delete { to, .. }
            | Call::AddNode { to, .. }
            | Call::RemoveNode { to, .. }
            | Call::AddReplica { to, .. }
            | Call::RemoveReplica { to, .. } => to,
        }
    }
}

type FailPredicate = Box<dyn Fn(&Call) -> bool + Send + Sync>;

/// Records calls in order. A request matching the failure predicate is
/// still recorded, then fails with a transport error.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    fail_when: Mutex<Option<FailPredicate>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later request for which `predicate` returns true.
    pub fn fail_when(&self, predicate: impl Fn(&Call) -> bool + Send + Sync + 'static) {
        *self.fail_when.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(predicate));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Calls addressed to one node
    pub fn calls_to(&self, node: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.to() == node).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, call: Call) -> FredResult<()> {
        let fail = self
            .fail_when
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|predicate| predicate(&call));
        let to = call.to().to_string();
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        if fail {
            return Err(FredError::transport(to, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Client for RecordingClient {
    async fn send_create_keygroup(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        _expiry: Expiry,
    ) -> FredResult<()> {
        self.record(Call::CreateKeygroup { to: node.id.clone(), keygroup: keygroup.clone() })
    }

    async fn send_delete_keygroup(&self, node: &Node, keygroup: &KeygroupName) -> FredResult<()> {
        self.record(Call::DeleteKeygroup { to: node.id.clone(), keygroup: keygroup.clone() })
    }

    async fn send_update(&self, node: &Node, item: &Item) -> FredResult<()> {
        self.record(Call::Update { to: node.id.clone(), item: item.clone() })
    }

    async fn send_delete(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()> {
        self.record(Call::Delete {
            to: node.id.clone(),
            keygroup: keygroup.clone(),
            id: id.to_string(),
            version: version.clone(),
        })
    }

    async fn send_add_node(&self, node: &Node, new_node: &Node) -> FredResult<()> {
        self.record(Call::AddNode { to: node.id.clone(), node: new_node.id.clone() })
    }

    async fn send_remove_node(&self, node: &Node, removed: &NodeId) -> FredResult<()> {
        self.record(Call::RemoveNode { to: node.id.clone(), node: removed.clone() })
    }

    async fn send_add_replica(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        replica: &NodeId,
    ) -> FredResult<()> {
        self.record(Call::AddReplica {
            to: node.id.clone(),
            keygroup: keygroup.clone(),
            replica: replica.clone(),
        })
    }

    async fn send_remove_replica(
        &self,
        node: &Node,
        keygroup: &KeygroupName,
        replica: &NodeId,
    ) -> FredResult<()> {
        self.record(Call::RemoveReplica {
            to: node.id.clone(),
            keygroup: keygroup.clone(),
            replica: replica.clone(),
        })
    }
}
