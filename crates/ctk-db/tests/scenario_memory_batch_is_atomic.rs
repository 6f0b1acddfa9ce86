//! Scenario: in-memory batch commits are all-or-nothing.
//!
//! # Invariants under test
//!
//! 1. A batch that addresses a missing record applies nothing.
//! 2. A batch rejected by a failing store applies nothing.
//! 3. A successful batch replaces every addressed mirror and publishes one
//!    change per record.
//! 4. An empty batch succeeds even when writes are failing.

use chrono::{TimeZone, Utc};
use ctk_db::{DispatchStore, MemoryStore, StoreError};
use ctk_reconcile::{DispatchRecord, MirrorTimestamp, MirrorValue, MirrorWrite, StatusMirror};

const COLL: &str = "dispatches";

fn write(id: &str, status: &str) -> MirrorWrite {
    MirrorWrite {
        id: id.to_string(),
        value: MirrorValue {
            status: status.to_string(),
            updated_at: MirrorTimestamp::ServerTimestamp,
        },
    }
}

async fn seeded() -> MemoryStore {
    MemoryStore::with_records(
        COLL,
        [
            DispatchRecord::new("d1", "delivered").with_mirror(StatusMirror::new("in_transit")),
            DispatchRecord::new("d2", "pending"),
        ],
    )
    .await
}

#[tokio::test]
async fn batch_with_missing_record_applies_nothing() {
    let store = seeded().await;

    let err = store
        .commit_mirrors(COLL, &[write("d1", "delivered"), write("ghost", "x")])
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::not_found(COLL, "ghost"));

    let d1 = store.get(COLL, "d1").await.unwrap();
    assert_eq!(d1.mirror_status(), Some("in_transit"), "d1 must be untouched");
}

#[tokio::test]
async fn failing_store_applies_nothing() {
    let store = seeded().await;
    store.set_fail_writes(true);

    let err = store
        .commit_mirrors(COLL, &[write("d1", "delivered"), write("d2", "pending")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));

    assert_eq!(store.get(COLL, "d1").await.unwrap().mirror_status(), Some("in_transit"));
    assert_eq!(store.get(COLL, "d2").await.unwrap().current_status, None);
}

#[tokio::test]
async fn successful_batch_replaces_every_mirror() {
    let store = seeded().await;
    let mut rx = store.changes();
    let at = Utc.with_ymd_and_hms(2025, 4, 4, 4, 4, 4).unwrap();

    let mut w2 = write("d2", "pending");
    w2.value.updated_at = MirrorTimestamp::At(at);

    store
        .commit_mirrors(COLL, &[write("d1", "delivered"), w2])
        .await
        .unwrap();

    let d1 = store.get(COLL, "d1").await.unwrap();
    assert_eq!(d1.mirror_status(), Some("delivered"));
    assert!(d1.current_status.unwrap().updated_at.is_some());

    let d2 = store.get(COLL, "d2").await.unwrap();
    assert_eq!(d2.current_status, Some(StatusMirror {
        status: Some("pending".to_string()),
        updated_at: Some(at),
    }));

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!((first.id.as_str(), second.id.as_str()), ("d1", "d2"));
    assert_eq!(first.before.status, first.after.status, "mirror writes never change status");
}

#[tokio::test]
async fn empty_batch_is_noop() {
    let store = seeded().await;
    store.set_fail_writes(true);
    store.commit_mirrors(COLL, &[]).await.unwrap();
}
