//! In-process [`DispatchStore`] backed by `BTreeMap`s.
//!
//! Every update (application status writes and mirror corrections alike) is
//! published on the change feed with its before/after images, the same shape
//! the Postgres trigger publishes. Inserts are not published.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use ctk_reconcile::{DispatchRecord, MirrorWrite};
use tokio::sync::{broadcast, RwLock};

use crate::{DispatchChange, DispatchStore, StoreError, CHANGE_FEED_CAPACITY};

type Collection = BTreeMap<String, DispatchRecord>;

pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    changes: broadcast::Sender<DispatchChange>,
    /// When set, every write fails with `Unavailable` and nothing is applied.
    fail_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            collections: RwLock::new(BTreeMap::new()),
            changes,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Store seeded with `records` in `collection`.
    pub async fn with_records(
        collection: &str,
        records: impl IntoIterator<Item = DispatchRecord>,
    ) -> Self {
        let store = Self::new();
        for r in records {
            store.insert(collection, r).await;
        }
        store
    }

    /// Create or replace a record. Not published on the change feed.
    pub async fn insert(&self, collection: &str, record: DispatchRecord) {
        let mut all = self.collections.write().await;
        all.entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<DispatchRecord> {
        let all = self.collections.read().await;
        all.get(collection)?.get(id).cloned()
    }

    /// Application-side primary status change: sets `status` and `updated_at`,
    /// leaves the mirror untouched, and publishes the update.
    pub async fn update_status(
        &self,
        collection: &str,
        id: &str,
        status: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_with(collection, id, |r| {
            r.status = Some(status.to_string());
            r.updated_at = Some(at);
        })
        .await
    }

    /// Apply an arbitrary in-place update and publish it.
    pub async fn update_with<F>(&self, collection: &str, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut DispatchRecord),
    {
        self.check_writable()?;

        let change = {
            let mut all = self.collections.write().await;
            let record = all
                .get_mut(collection)
                .and_then(|c| c.get_mut(id))
                .ok_or_else(|| StoreError::not_found(collection, id))?;

            let before = record.clone();
            f(record);
            DispatchChange {
                collection: collection.to_string(),
                id: id.to_string(),
                before,
                after: record.clone(),
            }
        };

        let _ = self.changes.send(change);
        Ok(())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DispatchStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, collection: &str) -> Result<Vec<DispatchRecord>, StoreError> {
        let all = self.collections.read().await;
        Ok(all
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit_mirrors(
        &self,
        collection: &str,
        writes: &[MirrorWrite],
    ) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        self.check_writable()?;

        let now = Utc::now();
        let changes = {
            let mut all = self.collections.write().await;
            let Some(records) = all.get_mut(collection) else {
                return Err(StoreError::not_found(collection, &writes[0].id));
            };

            // Validate the whole batch before touching anything.
            if let Some(missing) = writes.iter().find(|w| !records.contains_key(&w.id)) {
                return Err(StoreError::not_found(collection, &missing.id));
            }

            let mut changes = Vec::with_capacity(writes.len());
            for w in writes {
                if let Some(record) = records.get_mut(&w.id) {
                    let before = record.clone();
                    w.value.apply_to(record, now);
                    changes.push(DispatchChange {
                        collection: collection.to_string(),
                        id: w.id.clone(),
                        before,
                        after: record.clone(),
                    });
                }
            }
            changes
        };

        for c in changes {
            let _ = self.changes.send(c);
        }
        Ok(())
    }

    async fn write_mirror(&self, collection: &str, write: &MirrorWrite) -> Result<(), StoreError> {
        let now = Utc::now();
        self.update_with(collection, &write.id, |r| write.value.apply_to(r, now))
            .await
    }

    fn changes(&self) -> broadcast::Receiver<DispatchChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctk_reconcile::{MirrorTimestamp, MirrorValue, StatusMirror};

    fn write(id: &str, status: &str) -> MirrorWrite {
        MirrorWrite {
            id: id.to_string(),
            value: MirrorValue {
                status: status.to_string(),
                updated_at: MirrorTimestamp::ServerTimestamp,
            },
        }
    }

    #[tokio::test]
    async fn list_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.list("dispatches").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_mirror_resolves_server_timestamp() {
        let store = MemoryStore::with_records(
            "dispatches",
            [DispatchRecord::new("d1", "delivered").with_mirror(StatusMirror::new("in_transit"))],
        )
        .await;

        let before = Utc::now();
        store
            .write_mirror("dispatches", &write("d1", "delivered"))
            .await
            .unwrap();

        let rec = store.get("dispatches", "d1").await.unwrap();
        let mirror = rec.current_status.unwrap();
        assert_eq!(mirror.status.as_deref(), Some("delivered"));
        assert!(mirror.updated_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn write_mirror_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .write_mirror("dispatches", &write("nope", "delivered"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::not_found("dispatches", "nope"));
    }

    #[tokio::test]
    async fn update_status_publishes_before_and_after() {
        let store =
            MemoryStore::with_records("dispatches", [DispatchRecord::new("d1", "pending")]).await;
        let mut rx = store.changes();

        store
            .update_status("dispatches", "d1", "assigned", Utc::now())
            .await
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.id, "d1");
        assert_eq!(change.before.status.as_deref(), Some("pending"));
        assert_eq!(change.after.status.as_deref(), Some("assigned"));
    }
}
