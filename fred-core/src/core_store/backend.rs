//! Physical Storage Trait
//!
//! Contract between the store service and whatever actually keeps the bytes
//! (embedded KV engine, remote storage service, cloud table store).

use crate::core_types::{Expiry, FredResult, Item, KeygroupName, Trigger, VectorClock};
use async_trait::async_trait;

/// Physical storage backend.
///
/// Implementations must keep every version of a `(keygroup, id)` pair as a
/// separate row keyed by its vector clock: concurrent siblings coexist until
/// the store service prunes them. Backends provide no transactions; the
/// store service serializes writes to the same item itself.
///
/// Every keygroup-scoped method returns `FredError::NotFound` when the
/// keygroup does not exist.
#[async_trait]
pub trait Store: Send + Sync {
    /// Write (or overwrite) the row for `item.version`.
    async fn update(&self, item: &Item, expiry: Expiry) -> FredResult<()>;

    /// Remove the row for one version of an item.
    async fn delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()>;

    /// Store `val` under a freshly minted, unique ID and return that ID.
    ///
    /// Must be safe under concurrent callers; used by immutable keygroups.
    async fn append(
        &self,
        keygroup: &KeygroupName,
        val: &[u8],
        expiry: Expiry,
    ) -> FredResult<String>;

    /// Every unexpired row for one item; empty when the item has none.
    async fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>>;

    /// Rows of at most `count` distinct IDs, starting at `from_id` in ID order.
    async fn read_some(
        &self,
        keygroup: &KeygroupName,
        from_id: &str,
        count: usize,
    ) -> FredResult<Vec<Item>>;

    /// Every unexpired row in the keygroup.
    async fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>>;

    /// Distinct item IDs in the keygroup, sorted.
    async fn ids(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>>;

    /// Whether the item has at least one unexpired row.
    async fn exists(&self, keygroup: &KeygroupName, id: &str) -> FredResult<bool>;

    async fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()>;

    async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()>;

    async fn exists_keygroup(&self, keygroup: &KeygroupName) -> FredResult<bool>;

    async fn add_keygroup_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger: &Trigger,
    ) -> FredResult<()>;

    async fn delete_keygroup_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger_id: &str,
    ) -> FredResult<()>;

    async fn get_keygroup_triggers(&self, keygroup: &KeygroupName) -> FredResult<Vec<Trigger>>;

    /// Release backend resources. Later calls fail with a storage error.
    async fn close(&self) -> FredResult<()>;
}
