/*
    store_service.rs - Causally versioned reads and writes

    Wraps a physical [`Store`] and the [`VersionCache`]:
    - unconditional writes merge every live clock, tick the local counter
      and replace the live set
    - conditional writes name the versions the caller read, are rejected if
      one of those has since been superseded, and only resolve the named
      siblings
    - remote versions are admitted without ticking, discarded if already
      covered, and replace whatever they dominate
    - superseded rows are pruned best-effort

    Reads only ever return rows whose clock is in the live set.
*/

use super::backend::Store;
use super::version_cache::{LiveSet, VersionCache};
use crate::core_types::{
    validate_item_id, ClockOrdering, Expiry, FredError, FredResult, Item, KeygroupName, NodeId,
    Trigger, VectorClock,
};
use crate::metrics::{
    STORE_CONFLICTS, STORE_PRUNE_FAILURES, STORE_REMOTE_DISCARDED, STORE_WRITES,
};
use metrics::counter;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Versioned store of one node
pub struct StoreService {
    node_id: NodeId,
    store: Arc<dyn Store>,
    cache: VersionCache,
}

impl StoreService {
    /// Create a store service that ticks `node_id` on local writes
    pub fn new(node_id: impl Into<NodeId>, store: Arc<dyn Store>) -> Self {
        Self { node_id: node_id.into(), store, cache: VersionCache::new() }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    // ---------------------------------------------------------------------
    // Keygroups
    // ---------------------------------------------------------------------

    pub async fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        if self.store.exists_keygroup(keygroup).await? {
            return Err(FredError::Conflict(format!("keygroup {keygroup} already exists")));
        }
        self.store.create_keygroup(keygroup).await?;
        info!(keygroup = %keygroup, "Created keygroup");
        Ok(())
    }

    /// Delete a keygroup with all its rows and cached versions
    pub async fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.ensure_keygroup(keygroup).await?;
        self.store.delete_keygroup(keygroup).await?;
        self.cache.forget_keygroup(keygroup);
        info!(keygroup = %keygroup, "Deleted keygroup");
        Ok(())
    }

    pub async fn exists_keygroup(&self, keygroup: &KeygroupName) -> FredResult<bool> {
        self.store.exists_keygroup(keygroup).await
    }

    async fn ensure_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        if !self.store.exists_keygroup(keygroup).await? {
            return Err(FredError::NotFound(format!("keygroup {keygroup}")));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Every live version of an item; empty if it was never written.
    pub async fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        validate_item_id(id)?;
        self.ensure_keygroup(keygroup).await?;
        self.read_live(keygroup, id).await
    }

    /// Live versions of an item that `version` has already seen
    /// (equal to it or ancestors of it).
    pub async fn read_version(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: &VectorClock,
    ) -> FredResult<Vec<Item>> {
        let items = self.read(keygroup, id).await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                matches!(
                    item.version.compare(version),
                    ClockOrdering::Equal | ClockOrdering::Ancestor
                )
            })
            .collect())
    }

    /// Live versions of at most `count` items, starting at `from_id`.
    pub async fn scan(
        &self,
        keygroup: &KeygroupName,
        from_id: &str,
        count: usize,
    ) -> FredResult<Vec<Item>> {
        validate_item_id(from_id)?;
        self.ensure_keygroup(keygroup).await?;
        let rows = self.store.read_some(keygroup, from_id, count).await?;
        self.read_each(keygroup, rows).await
    }

    /// Live versions of every item in a keygroup.
    pub async fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>> {
        self.ensure_keygroup(keygroup).await?;
        let rows = self.store.read_all(keygroup).await?;
        self.read_each(keygroup, rows).await
    }

    /// IDs of every item with at least one row.
    pub async fn keys(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>> {
        self.ensure_keygroup(keygroup).await?;
        self.store.ids(keygroup).await
    }

    pub async fn exists_item(&self, keygroup: &KeygroupName, id: &str) -> FredResult<bool> {
        validate_item_id(id)?;
        self.ensure_keygroup(keygroup).await?;
        Ok(!self.read_live(keygroup, id).await?.is_empty())
    }

    async fn read_each(&self, keygroup: &KeygroupName, rows: Vec<Item>) -> FredResult<Vec<Item>> {
        let ids: BTreeSet<String> = rows.into_iter().map(|row| row.id).collect();
        let mut items = Vec::new();
        for id in ids {
            items.extend(self.read_live(keygroup, &id).await?);
        }
        Ok(items)
    }

    async fn read_live(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        let Some(live) = self.lock_known_item(keygroup, id).await? else {
            return Ok(Vec::new());
        };
        let rows = self.store.read(keygroup, id).await?;
        Ok(rows.into_iter().filter(|row| live.contains(&row.version)).collect())
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Write without a known version: supersedes every live version.
    pub async fn update(&self, item: &Item, expiry: Expiry) -> FredResult<VectorClock> {
        self.write(item.clone(), None, expiry).await
    }

    /// Write that resolves exactly the `known` versions the caller read.
    ///
    /// Fails with `Conflict` if one of `known` has been superseded since.
    /// Live siblings that are concurrent with the new version stay live.
    pub async fn update_versions(
        &self,
        item: &Item,
        known: &[VectorClock],
        expiry: Expiry,
    ) -> FredResult<VectorClock> {
        if known.is_empty() {
            return self.update(item, expiry).await;
        }
        self.write(item.clone(), Some(known), expiry).await
    }

    /// Delete without a known version.
    pub async fn tombstone(&self, keygroup: &KeygroupName, id: &str) -> FredResult<VectorClock> {
        self.write(Item::tombstone(keygroup.clone(), id), None, None).await
    }

    /// Delete that resolves exactly the `known` versions the caller read.
    pub async fn tombstone_versions(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        known: &[VectorClock],
    ) -> FredResult<VectorClock> {
        if known.is_empty() {
            return self.tombstone(keygroup, id).await;
        }
        self.write(Item::tombstone(keygroup.clone(), id), Some(known), None).await
    }

    async fn write(
        &self,
        item: Item,
        known: Option<&[VectorClock]>,
        expiry: Expiry,
    ) -> FredResult<VectorClock> {
        validate_item_id(&item.id)?;
        self.ensure_keygroup(&item.keygroup).await?;

        let mut live = self.lock_item(&item.keygroup, &item.id).await?;

        let mut version = match known {
            None => VectorClock::merged(live.clocks()),
            Some(known) => {
                if let Some((newer, stale)) = live.find_newer_than(known) {
                    counter!(STORE_CONFLICTS).increment(1);
                    warn!(
                        keygroup = %item.keygroup, id = %item.id,
                        "Rejected write based on {stale}, already superseded by {newer}"
                    );
                    return Err(FredError::Conflict(format!(
                        "version {stale} of {}/{} is outdated, {newer} is newer",
                        item.keygroup, item.id
                    )));
                }
                VectorClock::merged(known)
            }
        };
        version.tick(&self.node_id);

        let stored = item.with_version(version.clone());
        self.store.update(&stored, expiry).await?;

        let superseded = match known {
            None => live.replace_all(version.clone()),
            Some(_) => live.resolve(version.clone()),
        };
        counter!(STORE_WRITES).increment(1);
        debug!(
            keygroup = %stored.keygroup, id = %stored.id, tombstoned = stored.tombstoned,
            "Wrote version {version}, superseding {} version(s)", superseded.len()
        );

        self.prune(&stored.keygroup, &stored.id, &superseded).await;
        Ok(version)
    }

    /// Admit a version another replica already accepted.
    ///
    /// Returns `false` if an equal or newer version is already live, in which
    /// case nothing is written. Delivering the same version twice is a no-op.
    pub async fn add_version(&self, item: &Item, expiry: Expiry) -> FredResult<bool> {
        validate_item_id(&item.id)?;
        self.ensure_keygroup(&item.keygroup).await?;

        let mut live = self.lock_item(&item.keygroup, &item.id).await?;
        if live.covers(&item.version) {
            counter!(STORE_REMOTE_DISCARDED).increment(1);
            debug!(
                keygroup = %item.keygroup, id = %item.id,
                "Discarding known version {}", item.version
            );
            return Ok(false);
        }

        self.store.update(item, expiry).await?;
        let superseded = live.resolve(item.version.clone());
        counter!(STORE_WRITES).increment(1);
        debug!(
            keygroup = %item.keygroup, id = %item.id,
            "Admitted remote version {}, superseding {} version(s)",
            item.version,
            superseded.len()
        );

        self.prune(&item.keygroup, &item.id, &superseded).await;
        Ok(true)
    }

    /// Append to an immutable keygroup under a backend-minted ID.
    ///
    /// Appended items carry no version.
    pub async fn append(
        &self,
        keygroup: &KeygroupName,
        val: &[u8],
        expiry: Expiry,
    ) -> FredResult<Item> {
        self.ensure_keygroup(keygroup).await?;
        let id = self.store.append(keygroup, val, expiry).await?;
        debug!(keygroup = %keygroup, id = %id, "Appended item");
        Ok(Item::new(keygroup.clone(), id, val.to_vec()))
    }

    /// Delete the rows of superseded versions. Failures are logged only:
    /// a leftover row is never read again since its version is not live.
    pub async fn prune(&self, keygroup: &KeygroupName, id: &str, versions: &[VectorClock]) {
        for version in versions {
            if let Err(e) = self.store.delete(keygroup, id, version).await {
                counter!(STORE_PRUNE_FAILURES).increment(1);
                warn!(keygroup = %keygroup, id = %id, "Failed to prune version {version}: {e}");
            }
        }
    }

    /// Lock an item's live set, loading it from the store on first use.
    async fn lock_item(
        &self,
        keygroup: &KeygroupName,
        id: &str,
    ) -> FredResult<OwnedMutexGuard<LiveSet>> {
        let mut live = self.cache.entry(keygroup, id).lock_owned().await;
        if !live.is_loaded() {
            let rows = self.store.read(keygroup, id).await?;
            let stale = live.seed(rows.iter().map(|row| &row.version));
            if !stale.is_empty() {
                debug!(
                    keygroup = %keygroup, id = %id,
                    "Dropping {} stale row(s) on load", stale.len()
                );
                self.prune(keygroup, id, &stale).await;
            }
        }
        Ok(live)
    }

    /// Read-side variant of [`Self::lock_item`]: an item that is neither
    /// cached nor stored yields `None` and gets no cache entry.
    async fn lock_known_item(
        &self,
        keygroup: &KeygroupName,
        id: &str,
    ) -> FredResult<Option<OwnedMutexGuard<LiveSet>>> {
        if !self.cache.contains(keygroup, id) && self.store.read(keygroup, id).await?.is_empty() {
            return Ok(None);
        }
        self.lock_item(keygroup, id).await.map(Some)
    }

    /// Live clocks of an item (loads them if needed)
    pub async fn versions(
        &self,
        keygroup: &KeygroupName,
        id: &str,
    ) -> FredResult<Vec<VectorClock>> {
        validate_item_id(id)?;
        self.ensure_keygroup(keygroup).await?;
        Ok(match self.lock_known_item(keygroup, id).await? {
            Some(live) => live.clocks().to_vec(),
            None => Vec::new(),
        })
    }

    /// Number of items with a cached live set
    pub fn cached_items(&self) -> usize {
        self.cache.len()
    }

    // ---------------------------------------------------------------------
    // Triggers
    // ---------------------------------------------------------------------

    pub async fn add_trigger(&self, keygroup: &KeygroupName, trigger: &Trigger) -> FredResult<()> {
        self.ensure_keygroup(keygroup).await?;
        self.store.add_keygroup_trigger(keygroup, trigger).await
    }

    pub async fn delete_trigger(
        &self,
        keygroup: &KeygroupName,
        trigger_id: &str,
    ) -> FredResult<()> {
        self.ensure_keygroup(keygroup).await?;
        self.store.delete_keygroup_trigger(keygroup, trigger_id).await
    }

    pub async fn get_triggers(&self, keygroup: &KeygroupName) -> FredResult<Vec<Trigger>> {
        self.ensure_keygroup(keygroup).await?;
        self.store.get_keygroup_triggers(keygroup).await
    }
}
