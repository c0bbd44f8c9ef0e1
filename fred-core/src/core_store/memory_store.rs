//! In-Memory Store
//!
//! Reference implementation of [`Store`]. Used by tests and by nodes that do
//! not need durability. Expiry deadlines use `tokio::time::Instant` so tests
//! can drive them with a paused clock.

use super::backend::Store;
use crate::core_types::{Expiry, FredError, FredResult, Item, KeygroupName, Trigger, VectorClock};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Row {
    val: Vec<u8>,
    tombstoned: bool,
    expires_at: Option<Instant>,
}

impl Row {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
struct KeygroupData {
    /// id -> version -> row
    items: BTreeMap<String, HashMap<VectorClock, Row>>,
    triggers: BTreeMap<String, Trigger>,
    next_append: u64,
}

impl KeygroupData {
    fn live_rows<'a>(
        &'a self,
        keygroup: &'a KeygroupName,
        id: &'a str,
        now: Instant,
    ) -> impl Iterator<Item = Item> + 'a {
        self.items
            .get(id)
            .into_iter()
            .flat_map(|rows| rows.iter())
            .filter(move |(_, row)| !row.is_expired(now))
            .map(move |(version, row)| Item {
                keygroup: keygroup.clone(),
                id: id.to_string(),
                val: row.val.clone(),
                version: version.clone(),
                tombstoned: row.tombstoned,
            })
    }

    fn has_live_row(&self, id: &str, now: Instant) -> bool {
        self.items
            .get(id)
            .is_some_and(|rows| rows.values().any(|row| !row.is_expired(now)))
    }
}

const APPEND_ID_WIDTH: usize = 20;

fn missing_keygroup(keygroup: &KeygroupName) -> FredError {
    FredError::NotFound(format!("keygroup {keygroup}"))
}

/// In-memory store (no persistence across restarts)
pub struct MemoryStore {
    keygroups: RwLock<HashMap<KeygroupName, KeygroupData>>,
    closed: AtomicBool,
    sweep_on_read: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            keygroups: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            sweep_on_read: false,
        }
    }

    /// Physically drop an item's expired rows whenever it is read.
    pub fn with_sweep_on_read(mut self, enabled: bool) -> Self {
        self.sweep_on_read = enabled;
        self
    }

    fn check_open(&self) -> FredResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FredError::Storage("store is closed".to_string()));
        }
        Ok(())
    }

    /// Physically drop every expired row. Returns how many were removed.
    pub async fn purge_expired(&self) -> FredResult<usize> {
        self.check_open()?;
        let now = Instant::now();
        let mut keygroups = self.keygroups.write().await;
        let mut removed = 0;
        for data in keygroups.values_mut() {
            for rows in data.items.values_mut() {
                let before = rows.len();
                rows.retain(|_, row| !row.is_expired(now));
                removed += before - rows.len();
            }
            data.items.retain(|_, rows| !rows.is_empty());
        }
        Ok(removed)
    }

    /// Number of physical rows, including ones no longer live in any cache
    pub async fn row_count(&self, keygroup: &KeygroupName, id: &str) -> usize {
        let keygroups = self.keygroups.read().await;
        keygroups
            .get(keygroup)
            .and_then(|data| data.items.get(id))
            .map_or(0, |rows| rows.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn update(&self, item: &Item, expiry: Expiry) -> FredResult<()> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        let data = keygroups
            .get_mut(&item.keygroup)
            .ok_or_else(|| missing_keygroup(&item.keygroup))?;

        let row = Row {
            val: item.val.clone(),
            tombstoned: item.tombstoned,
            expires_at: expiry.map(|ttl| Instant::now() + ttl),
        };
        data.items.entry(item.id.clone()).or_default().insert(item.version.clone(), row);

        // Appended IDs received from peers must not be minted again here
        if item.id.len() == APPEND_ID_WIDTH {
            if let Ok(n) = item.id.parse::<u64>() {
                data.next_append = data.next_append.max(n.saturating_add(1));
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<()> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        let data = keygroups.get_mut(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;

        let rows = data
            .items
            .get_mut(id)
            .ok_or_else(|| FredError::NotFound(format!("item {keygroup}/{id}")))?;
        if rows.remove(version).is_none() {
            return Err(FredError::NotFound(format!("version {version} of {keygroup}/{id}")));
        }
        if rows.is_empty() {
            data.items.remove(id);
        }
        Ok(())
    }

    async fn append(
        &self,
        keygroup: &KeygroupName,
        val: &[u8],
        expiry: Expiry,
    ) -> FredResult<String> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        let data = keygroups.get_mut(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;

        // Zero-padded so that string order matches append order
        let id = format!("{:0width$}", data.next_append, width = APPEND_ID_WIDTH);
        data.next_append += 1;

        let row = Row {
            val: val.to_vec(),
            tombstoned: false,
            expires_at: expiry.map(|ttl| Instant::now() + ttl),
        };
        data.items.entry(id.clone()).or_default().insert(VectorClock::new(), row);
        Ok(id)
    }

    async fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        self.check_open()?;
        if self.sweep_on_read {
            let mut keygroups = self.keygroups.write().await;
            let data = keygroups.get_mut(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
            let now = Instant::now();
            if let Some(rows) = data.items.get_mut(id) {
                rows.retain(|_, row| !row.is_expired(now));
                if rows.is_empty() {
                    data.items.remove(id);
                }
            }
            return Ok(data.live_rows(keygroup, id, now).collect());
        }
        let keygroups = self.keygroups.read().await;
        let data = keygroups.get(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        Ok(data.live_rows(keygroup, id, Instant::now()).collect())
    }

    async fn read_some(
        &self,
        keygroup: &KeygroupName,
        from_id: &str,
        count: usize,
    ) -> FredResult<Vec<Item>> {
        self.check_open()?;
        let keygroups = self.keygroups.read().await;
        let data = keygroups.get(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        let now = Instant::now();

        let items = data
            .items
            .range(from_id.to_string()..)
            .map(|(id, _)| id)
            .filter(|id| data.has_live_row(id, now))
            .take(count)
            .flat_map(|id| data.live_rows(keygroup, id, now))
            .collect();
        Ok(items)
    }

    async fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>> {
        self.check_open()?;
        let keygroups = self.keygroups.read().await;
        let data = keygroups.get(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        let now = Instant::now();

        Ok(data.items.keys().flat_map(|id| data.live_rows(keygroup, id, now)).collect())
    }

    async fn ids(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>> {
        self.check_open()?;
        let keygroups = self.keygroups.read().await;
        let data = keygroups.get(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        let now = Instant::now();

        Ok(data.items.keys().filter(|id| data.has_live_row(id, now)).cloned().collect())
    }

    async fn exists(&self, keygroup: &KeygroupName, id: &str) -> FredResult<bool> {
        self.check_open()?;
        let keygroups = self.keygroups.read().await;
        let data = keygroups.get(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        Ok(data.has_live_row(id, Instant::now()))
    }

    async fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        if keygroups.contains_key(keygroup) {
            return Err(FredError::Conflict(format!("keygroup {keygroup} already exists")));
        }
        keygroups.insert(keygroup.clone(), KeygroupData::default());
        Ok(())
    }

    async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        keygroups.remove(keygroup).map(|_| ()).ok_or_else(|| missing_keygroup(keygroup))
    }

    async fn exists_keygroup(&self, keygroup: &KeygroupName) -> FredResult<bool> {
        self.check_open()?;
        Ok(self.keygroups.read().await.contains_key(keygroup))
    }

    async fn add_keygroup_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger: &Trigger,
    ) -> FredResult<()> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        let data = keygroups.get_mut(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        data.triggers.insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    async fn delete_keygroup_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger_id: &str,
    ) -> FredResult<()> {
        self.check_open()?;
        let mut keygroups = self.keygroups.write().await;
        let data = keygroups.get_mut(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        data.triggers
            .remove(trigger_id)
            .map(|_| ())
            .ok_or_else(|| FredError::NotFound(format!("trigger {trigger_id} on {keygroup}")))
    }

    async fn get_keygroup_triggers(&self, keygroup: &KeygroupName) -> FredResult<Vec<Trigger>> {
        self.check_open()?;
        let keygroups = self.keygroups.read().await;
        let data = keygroups.get(keygroup).ok_or_else(|| missing_keygroup(keygroup))?;
        Ok(data.triggers.values().cloned().collect())
    }

    async fn close(&self) -> FredResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn kg() -> KeygroupName {
        KeygroupName::new("kg").unwrap()
    }

    fn version(node: &str, counter: u64) -> VectorClock {
        [(node, counter)].into_iter().collect()
    }

    async fn store_with_keygroup() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_keygroup(&kg()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_siblings_are_separate_rows() {
        let store = store_with_keygroup().await;

        let a = Item::new(kg(), "x", b"from-a".to_vec()).with_version(version("a", 1));
        let b = Item::new(kg(), "x", b"from-b".to_vec()).with_version(version("b", 1));
        store.update(&a, None).await.unwrap();
        store.update(&b, None).await.unwrap();

        let mut rows = store.read(&kg(), "x").await.unwrap();
        rows.sort_by(|l, r| l.val.cmp(&r.val));
        assert_eq!(rows, vec![a, b]);
    }

    #[tokio::test]
    async fn test_delete_single_version() {
        let store = store_with_keygroup().await;
        let a = Item::new(kg(), "x", b"1".to_vec()).with_version(version("a", 1));
        store.update(&a, None).await.unwrap();

        store.delete(&kg(), "x", &version("a", 1)).await.unwrap();
        assert!(store.read(&kg(), "x").await.unwrap().is_empty());
        assert!(!store.exists(&kg(), "x").await.unwrap());

        let err = store.delete(&kg(), "x", &version("a", 1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_keygroup_is_not_found() {
        let store = MemoryStore::new();
        let err = store.read(&kg(), "x").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.delete_keygroup(&kg()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_keygroup_twice_conflicts() {
        let store = store_with_keygroup().await;
        assert!(store.create_keygroup(&kg()).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_append_mints_ordered_ids() {
        let store = store_with_keygroup().await;
        let first = store.append(&kg(), b"one", None).await.unwrap();
        let second = store.append(&kg(), b"two", None).await.unwrap();

        assert_ne!(first, second);
        assert!(first < second);
        assert_eq!(store.ids(&kg()).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_read_some_counts_distinct_ids() {
        let store = store_with_keygroup().await;
        for (id, node) in [("a", "n1"), ("a", "n2"), ("b", "n1"), ("c", "n1")] {
            let item = Item::new(kg(), id, b"v".to_vec()).with_version(version(node, 1));
            store.update(&item, None).await.unwrap();
        }

        let rows = store.read_some(&kg(), "a", 2).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.id == "a" || r.id == "b"));

        let rows = store.read_some(&kg(), "b", 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_rows_are_hidden_then_purged() {
        let store = store_with_keygroup().await;
        let item = Item::new(kg(), "x", b"temp".to_vec()).with_version(version("a", 1));
        store.update(&item, Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(store.read(&kg(), "x").await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.read(&kg(), "x").await.unwrap().is_empty());
        assert_eq!(store.row_count(&kg(), "x").await, 1);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.row_count(&kg(), "x").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_on_read_drops_expired_rows() {
        let store = MemoryStore::new().with_sweep_on_read(true);
        store.create_keygroup(&kg()).await.unwrap();
        let item = Item::new(kg(), "x", b"temp".to_vec()).with_version(version("a", 1));
        store.update(&item, Some(Duration::from_secs(5))).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.read(&kg(), "x").await.unwrap().is_empty());
        assert_eq!(store.row_count(&kg(), "x").await, 0);
    }

    #[tokio::test]
    async fn test_received_append_ids_are_not_reminted() {
        let store = store_with_keygroup().await;
        let remote = Item::new(kg(), format!("{:020}", 0), b"remote".to_vec());
        store.update(&remote, None).await.unwrap();

        let local = store.append(&kg(), b"local", None).await.unwrap();
        assert_eq!(local, format!("{:020}", 1));
        assert_eq!(store.row_count(&kg(), &remote.id).await, 1);
    }

    #[tokio::test]
    async fn test_trigger_crud() {
        let store = store_with_keygroup().await;
        let trigger = Trigger { id: "t1".to_string(), host: "10.0.0.5:3333".to_string() };

        store.add_keygroup_trigger(&kg(), &trigger).await.unwrap();
        assert_eq!(store.get_keygroup_triggers(&kg()).await.unwrap(), vec![trigger]);

        store.delete_keygroup_trigger(&kg(), "t1").await.unwrap();
        assert!(store.get_keygroup_triggers(&kg()).await.unwrap().is_empty());
        assert!(store.delete_keygroup_trigger(&kg(), "t1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = store_with_keygroup().await;
        store.close().await.unwrap();
        let err = store.exists_keygroup(&kg()).await.unwrap_err();
        assert_eq!(err.kind(), crate::core_types::ErrorKind::Internal);
    }
}
