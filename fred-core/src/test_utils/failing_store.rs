//! Memory store with switchable write failures

use crate::core_store::{MemoryStore, Store};
use crate::core_types::{Expiry, FredError, FredResult, Item, KeygroupName, Trigger, VectorClock};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Delegates to a [`MemoryStore`] unless a failure switch is on.
pub struct FailingStore {
    inner: Arc<MemoryStore>,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
    failed_deletes: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_updates: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            failed_deletes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// How many row deletions were refused so far
    pub fn failed_deletes(&self) -> usize {
        self.failed_deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn update(&self, item: &Item, expiry: Expiry) -> FredResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(FredError::Storage("injected update failure".to_string()));
        }
        self.inner.update(item, expiry).await
    }

    async fn delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            self.failed_deletes.fetch_add(1, Ordering::SeqCst);
            return Err(FredError::Storage("injected delete failure".to_string()));
        }
        self.inner.delete(keygroup, id, version).await
    }

    async fn append(
        &self,
        keygroup: &KeygroupName,
        val: &[u8],
        expiry: Expiry,
    ) -> FredResult<String> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(FredError::Storage("injected update failure".to_string()));
        }
        self.inner.append(keygroup, val, expiry).await
    }

    async fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        self.inner.read(keygroup, id).await
    }

    async fn read_some(
        &self,
        keygroup: &KeygroupName,
        from_id: &str,
        count: usize,
    ) -> FredResult<Vec<Item>> {
        self.inner.read_some(keygroup, from_id, count).await
    }

    async fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>> {
        self.inner.read_all(keygroup).await
    }

    async fn ids(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>> {
        self.inner.ids(keygroup).await
    }

    async fn exists(&self, keygroup: &KeygroupName, id: &str) -> FredResult<bool> {
        self.inner.exists(keygroup, id).await
    }

    async fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.inner.create_keygroup(keygroup).await
    }

    async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.inner.delete_keygroup(keygroup).await
    }

    async fn exists_keygroup(&self, keygroup: &KeygroupName) -> FredResult<bool> {
        self.inner.exists_keygroup(keygroup).await
    }

    async fn add_keygroup_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger: &Trigger,
    ) -> FredResult<()> {
        self.inner.add_keygroup_trigger(keygroup, trigger).await
    }

    async fn delete_keygroup_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger_id: &str,
    ) -> FredResult<()> {
        self.inner.delete_keygroup_trigger(keygroup, trigger_id).await
    }

    async fn get_keygroup_triggers(&self, keygroup: &KeygroupName) -> FredResult<Vec<Trigger>> {
        self.inner.get_keygroup_triggers(keygroup).await
    }

    async fn close(&self) -> FredResult<()> {
        self.inner.close().await
    }
}
